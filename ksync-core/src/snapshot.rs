//! Full content of one environment: secrets plus tracked files.

use std::collections::BTreeMap;

use ksync_types::{FileValue, Payload, SecretValue, TypesError};

use crate::changes::Change;
use crate::diff::{diff, diff_files};
use crate::path::check_tracked_path;

/// One environment's secrets and files, keyed by name and path.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Secret name to value.
    pub secrets: BTreeMap<String, String>,
    /// Tracked path to content.
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the snapshot holds nothing.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty() && self.files.is_empty()
    }

    /// Build a snapshot from a decrypted payload.
    ///
    /// Later duplicates of a label or path win. File paths are validated,
    /// since they come from another device.
    pub fn from_payload(payload: &Payload) -> Result<Self, SnapshotError> {
        let mut snapshot = Self::new();
        for secret in &payload.secrets {
            snapshot
                .secrets
                .insert(secret.label.clone(), secret.value.clone());
        }
        for file in &payload.files {
            check_tracked_path(&file.path).map_err(SnapshotError::Path)?;
            let content = file.decode().map_err(SnapshotError::Types)?;
            snapshot.files.insert(file.path.clone(), content);
        }
        Ok(snapshot)
    }

    /// Convert into a payload, sorted by label and path.
    pub fn to_payload(&self) -> Payload {
        Payload {
            secrets: self
                .secrets
                .iter()
                .map(|(label, value)| SecretValue::new(label.as_str(), value.as_str()))
                .collect(),
            files: self
                .files
                .iter()
                .map(|(path, content)| FileValue::from_bytes(path.as_str(), content))
                .collect(),
        }
    }

    /// Changes that turn `self` into `new`: secrets first, then files.
    pub fn changes_to(&self, new: &Snapshot) -> Vec<Change> {
        let mut changes = diff(&self.secrets, &new.secrets);
        changes.extend(diff_files(&self.files, &new.files));
        changes
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Why a payload could not be turned into a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A file entry had an unsafe path.
    #[error(transparent)]
    Path(crate::path::PathError),

    /// A file entry could not be decoded.
    #[error(transparent)]
    Types(TypesError),
}
