//! Zip archiver for the finished working directory

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::Pattern;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use super::error::ArchiveError;
use super::traits::Archiver;

/// Default directories left out of archives
pub const DEFAULT_EXCLUDES: [&str; 7] = ["node_modules", "target", "dist", "build", ".git", "__pycache__", ".venv"];

/// Writes `<output_dir>/<task_id>.zip`
#[derive(Debug, Clone)]
pub struct ZipArchiver {
    output_dir: PathBuf,
}

impl ZipArchiver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Archiver for ZipArchiver {
    async fn archive(&self, task_id: &str, source_dir: &Path, excludes: &[String]) -> Result<PathBuf, ArchiveError> {
        debug!(%task_id, source = %source_dir.display(), "ZipArchiver::archive: called");
        let patterns = compile_patterns(excludes)?;
        let source = source_dir.to_path_buf();
        let output = self.output_dir.join(format!("{}.zip", task_id));

        let path = tokio::task::spawn_blocking(move || write_zip(&source, &output, &patterns))
            .await
            .map_err(|e| ArchiveError::Join(e.to_string()))??;
        info!(%task_id, artifact = %path.display(), "Archive written");
        Ok(path)
    }
}

fn compile_patterns(excludes: &[String]) -> Result<Vec<Pattern>, ArchiveError> {
    excludes
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| ArchiveError::BadPattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// True when any component of the relative path matches an exclude pattern
fn is_excluded(relative: &Path, patterns: &[Pattern]) -> bool {
    relative.components().any(|c| {
        let part = c.as_os_str().to_string_lossy();
        patterns.iter().any(|p| p.matches(&part))
    })
}

fn write_zip(source: &Path, output: &Path, patterns: &[Pattern]) -> Result<PathBuf, ArchiveError> {
    if !source.is_dir() {
        return Err(ArchiveError::MissingSource(source.display().to_string()));
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(output)?;
    let count = discard_on_error(output, || write_entries(file, source, output, patterns))?;
    debug!(files = count, output = %output.display(), "write_zip: finished");
    Ok(output.to_path_buf())
}

/// Remove a partially written `output` when `write` fails
fn discard_on_error<T>(output: &Path, write: impl FnOnce() -> Result<T, ArchiveError>) -> Result<T, ArchiveError> {
    let result = write();
    if result.is_err() {
        match std::fs::remove_file(output) {
            Ok(()) => debug!(output = %output.display(), "discard_on_error: removed partial archive"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(output = %output.display(), error = %e, "Could not remove partial archive"),
        }
    }
    result
}

fn write_entries(file: File, source: &Path, output: &Path, patterns: &[Pattern]) -> Result<usize, ArchiveError> {
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut count = 0usize;
    let mut buffer = Vec::new();

    let walker = WalkDir::new(source).sort_by_file_name().into_iter().filter_entry(|entry| {
        entry
            .path()
            .strip_prefix(source)
            .map(|rel| !is_excluded(rel, patterns))
            .unwrap_or(true)
    });

    for entry in walker {
        let entry = entry?;
        let path = entry.path();
        if path == output {
            continue;
        }
        let Ok(relative) = path.strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        // Zip entry names always use forward slashes
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            buffer.clear();
            File::open(path)?.read_to_end(&mut buffer)?;
            writer.write_all(&buffer)?;
            count += 1;
        }
    }

    writer.finish()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn excludes() -> Vec<String> {
        DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_archive_skips_excluded_dirs() {
        let src = tempdir().unwrap();
        let out = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("src")).unwrap();
        std::fs::create_dir_all(src.path().join("node_modules/lib")).unwrap();
        std::fs::write(src.path().join("package.json"), "{}").unwrap();
        std::fs::write(src.path().join("src/index.ts"), "export {}").unwrap();
        std::fs::write(src.path().join("node_modules/lib/x.js"), "junk").unwrap();

        let artifact = ZipArchiver::new(out.path())
            .archive("t-1", src.path(), &excludes())
            .await
            .unwrap();
        assert_eq!(artifact, out.path().join("t-1.zip"));

        let names = entry_names(&artifact);
        assert!(names.contains(&"package.json".to_string()));
        assert!(names.contains(&"src/index.ts".to_string()));
        assert!(!names.iter().any(|n| n.contains("node_modules")));
    }

    #[tokio::test]
    async fn test_archive_inside_source_is_not_self_included() {
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "a").unwrap();

        let artifact = ZipArchiver::new(src.path())
            .archive("t-2", src.path(), &[])
            .await
            .unwrap();
        let names = entry_names(&artifact);
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_archive_missing_source_fails() {
        let out = tempdir().unwrap();
        let result = ZipArchiver::new(out.path())
            .archive("t-3", &out.path().join("missing"), &[])
            .await;
        assert!(matches!(result, Err(ArchiveError::MissingSource(_))));
    }

    #[tokio::test]
    async fn test_bad_pattern() {
        let out = tempdir().unwrap();
        let result = ZipArchiver::new(out.path())
            .archive("t-4", out.path(), &["[".to_string()])
            .await;
        assert!(matches!(result, Err(ArchiveError::BadPattern { .. })));
    }

    #[test]
    fn test_failed_write_removes_partial_output() {
        let out = tempdir().unwrap();
        let output = out.path().join("t-5.zip");
        std::fs::write(&output, "PK partial").unwrap();

        let result: Result<(), ArchiveError> = discard_on_error(&output, || {
            Err(ArchiveError::Io(std::io::Error::other("disk full")))
        });
        assert!(matches!(result, Err(ArchiveError::Io(_))));
        assert!(!output.exists());

        // Nothing to remove is not an error either
        let again: Result<(), ArchiveError> =
            discard_on_error(&output, || Err(ArchiveError::Join("worker died".to_string())));
        assert!(matches!(again, Err(ArchiveError::Join(_))));
    }

    #[test]
    fn test_successful_write_keeps_output() {
        let src = tempdir().unwrap();
        let out = tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "a").unwrap();

        let output = out.path().join("t-6.zip");
        let path = write_zip(src.path(), &output, &[]).unwrap();
        assert_eq!(path, output);
        assert_eq!(entry_names(&output), vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_is_excluded_matches_globs() {
        let patterns = compile_patterns(&["*.log".to_string(), "dist".to_string()]).unwrap();
        assert!(is_excluded(Path::new("logs/app.log"), &patterns));
        assert!(is_excluded(Path::new("web/dist/bundle.js"), &patterns));
        assert!(!is_excluded(Path::new("src/distance.ts"), &patterns));
    }
}
