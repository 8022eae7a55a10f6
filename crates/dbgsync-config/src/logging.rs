//! Log file helpers.
//!
//! Default path resolution, directory creation and size-based rotation.
//! Subscriber setup stays in the binary, which is the only crate depending
//! on `tracing-subscriber`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::paths::AppPaths;

/// Rotate once the active file reaches this size (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Rotated files kept besides the active one.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

/// `<log_dir>/dbgsync.log`, or a temp-dir path when no home is known.
pub fn default_log_file_path() -> PathBuf {
    match AppPaths::new() {
        Ok(paths) => paths.log_dir().join("dbgsync.log"),
        Err(_) => std::env::temp_dir().join("dbgsync").join("dbgsync.log"),
    }
}

/// Create the parent directory of `log_path` if needed.
pub fn ensure_log_dir(log_path: &Path) -> io::Result<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Rotate `log_path` when it has grown past `max_size` bytes.
///
/// ```text
///   dbgsync.log   -> dbgsync.log.1
///   dbgsync.log.1 -> dbgsync.log.2
///   ...
///   dbgsync.log.<max_files> is deleted
/// ```
pub fn rotate_log_files(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    if !log_path.exists() || fs::metadata(log_path)?.len() < max_size {
        return Ok(());
    }

    let oldest = rotated_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for i in (1..max_files).rev() {
        let from = rotated_path(log_path, i);
        if from.exists() {
            fs::rename(&from, rotated_path(log_path, i + 1))?;
        }
    }
    fs::rename(log_path, rotated_path(log_path, 1))
}

fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let name = base.file_name().unwrap_or_default().to_string_lossy();
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{name}.{index}"))
}
