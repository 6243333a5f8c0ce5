//! Collaborator error types

use thiserror::Error;

/// A single file could not be produced
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("No content available for {0}")]
    NoContent(String),

    #[error("Generator command failed for {path} (exit {exit_code}): {stderr}")]
    CommandFailed {
        path: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Generator timed out for {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The test collaborator could not run at all (distinct from failing tests)
#[derive(Debug, Error)]
pub enum TestError {
    #[error("Test command timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FixError {
    #[error("Fix command timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read plan {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plan: {0}")]
    Parse(String),

    #[error("Plan has no files")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Source directory does not exist: {0}")]
    MissingSource(String),

    #[error("Invalid exclude pattern {pattern}: {reason}")]
    BadPattern { pattern: String, reason: String },

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive worker failed: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
