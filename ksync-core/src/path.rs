//! Tracked-path validation.
//!
//! Tracked files are addressed by paths relative to the project root. A path
//! arriving in a payload is untrusted input and must not be able to escape
//! either the working tree or the cache directory.

use std::path::{Component, Path};
use thiserror::Error;

/// Why a tracked path was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path is empty.
    #[error("path is empty")]
    Empty,

    /// The path is absolute or carries a drive prefix.
    #[error("path {0} is not relative")]
    NotRelative(String),

    /// The path contains a `..` component.
    #[error("path {0} leaves the project tree")]
    Escapes(String),

    /// The path contains a NUL byte or a `.` component.
    #[error("path {0} is not normalized")]
    NotNormalized(String),
}

/// Check that `path` is a normalized relative path inside the tree.
pub fn check_tracked_path(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.contains('\0') {
        return Err(PathError::NotNormalized(path.to_string()));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir => return Err(PathError::Escapes(path.to_string())),
            Component::CurDir => return Err(PathError::NotNormalized(path.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::NotRelative(path.to_string()))
            }
        }
    }
    Ok(())
}
