//! Task and feedback ID generation
//!
//! Task IDs use the format: `{8-char-hex}-task-{slug}`
//! Example: `3f9a01c2-task-todo-app-with-auth`

/// Longest slug kept in a generated ID
const MAX_SLUG_LEN: usize = 40;

/// Generate an ID from a kind and a free-form title
///
/// The hex prefix comes from the random tail of a v7 UUID so that two IDs
/// generated in the same millisecond for the same title still differ.
pub fn generate_id(kind: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    let hex_prefix = &uuid[uuid.len() - 8..];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}-{}", hex_prefix, kind)
    } else {
        format!("{}-{}-{}", hex_prefix, kind, slug)
    }
}

/// Generate an opaque feedback ID
pub fn feedback_id() -> String {
    format!("fb-{}", uuid::Uuid::now_v7().simple())
}

/// Slugify a title for use in IDs
fn slugify(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        // Strip apostrophes entirely, replace other non-alphanumeric with hyphens
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.len() > MAX_SLUG_LEN {
        slug[..MAX_SLUG_LEN].trim_end_matches('-').to_string()
    } else {
        slug
    }
}
