//! Formatting and filesystem helpers shared by the install and uninstall flows.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Formats a duration in seconds into a human-readable string.
///
/// `3661` renders as `1h 1m 1s`, `61` as `1m 1s`, `30` as `30s`.
pub fn format_duration(seconds: i64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    match (hours, minutes) {
        (0, 0) => format!("{}s", secs),
        (0, _) => format!("{}m {}s", minutes, secs),
        _ => format!("{}h {}m {}s", hours, minutes, secs),
    }
}

/// Formats a byte count using binary units with one decimal place.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathValidationError {
    /// The path does not exist or cannot be canonicalized
    InvalidPath(String),
    /// The path escapes the allowed base directory
    PathTraversal { path: PathBuf, base: PathBuf },
}

impl std::fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(msg) => write!(f, "Invalid path: {}", msg),
            Self::PathTraversal { path, base } => {
                write!(
                    f,
                    "'{}' resolves outside '{}'",
                    path.display(),
                    base.display()
                )
            }
        }
    }
}

impl std::error::Error for PathValidationError {}

/// Canonicalize `path` and require it to stay inside `allowed_base`.
///
/// Both paths must exist. Symlinks and `..` components are resolved before
/// the containment check, so a link pointing out of the workspace is rejected.
pub fn validate_path_within(
    path: impl AsRef<Path>,
    allowed_base: impl AsRef<Path>,
) -> Result<PathBuf, PathValidationError> {
    let path = path.as_ref();
    let allowed_base = allowed_base.as_ref();

    let canonical_base = allowed_base
        .canonicalize()
        .map_err(|e| PathValidationError::InvalidPath(format!("Base path error: {}", e)))?;

    let canonical_path = path
        .canonicalize()
        .map_err(|e| PathValidationError::InvalidPath(format!("{}: {}", path.display(), e)))?;

    if canonical_path.starts_with(&canonical_base) {
        Ok(canonical_path)
    } else {
        Err(PathValidationError::PathTraversal {
            path: canonical_path,
            base: canonical_base,
        })
    }
}

/// Recursively copy `src` into `dest`, returning the number of bytes copied.
///
/// Symlinks are recreated as links and never followed, so a link cycle is
/// copied as-is.
pub fn copy_recursive(src: &Path, dest: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = if rel.as_os_str().is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(rel)
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if file_type.is_symlink() {
            copy_link(entry.path(), &target)?;
        } else {
            total += std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(total)
}

#[cfg(unix)]
fn copy_link(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(src)?, dest)
}

#[cfg(not(unix))]
fn copy_link(src: &Path, dest: &Path) -> io::Result<()> {
    tracing::warn!("Skipping symlink {} -> {}", src.display(), dest.display());
    Ok(())
}

/// Total size of the files under `path`. Links and unreadable entries count as zero.
pub fn disk_usage(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
