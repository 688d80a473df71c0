//! Write-temp-then-rename helpers for the cache and working tree.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Result, SyncError};

/// Create a temp file next to `path` holding `content`, ready to persist.
pub(crate) fn stage(path: &Path, content: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(SyncError::io(dir))?;
    let mut temp = NamedTempFile::new_in(dir).map_err(SyncError::io(dir))?;
    temp.write_all(content).map_err(SyncError::io(path))?;
    temp.as_file().sync_all().map_err(SyncError::io(path))?;
    Ok(temp)
}

/// Move a staged temp file over `path`.
pub(crate) fn persist(temp: NamedTempFile, path: &Path) -> Result<()> {
    temp.persist(path)
        .map(|_| ())
        .map_err(|e| SyncError::io(path)(e.error))
}

/// Atomically replace `path` with `content`.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    persist(stage(path, content)?, path)
}

/// Read a file, treating "not found" as `None`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::io(path)(e)),
    }
}

/// Remove a file, treating "not found" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io(path)(e)),
    }
}
