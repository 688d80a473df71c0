//! The environments manifest: `environments.json` in the cache directory.
//!
//! Records which environments this device knows, the last version stamp it
//! observed for each, and which one is materialized in the working tree.

use serde::{Deserialize, Serialize};
use std::path::Path;

use ksync_types::{EnvironmentId, EnvironmentRecord, VersionStamp};

use crate::atomic::{read_optional, write_atomic};
use crate::error::{Result, SyncError};

/// File name of the manifest inside the cache directory.
pub const MANIFEST_FILE: &str = "environments.json";

/// Locally known environments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Name of the materialized environment, empty when none.
    #[serde(default)]
    pub current: String,
    /// Known environments with their last observed stamps.
    #[serde(default)]
    pub environments: Vec<EnvironmentRecord>,
}

impl Manifest {
    /// Load from `path`; a missing file is an empty manifest.
    pub fn load(path: &Path) -> Result<Self> {
        match read_optional(path)? {
            None => Ok(Self::default()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| SyncError::CorruptCache {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    /// Atomically write to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| SyncError::Payload {
            environment: String::new(),
            reason: e.to_string(),
        })?;
        write_atomic(path, &bytes)
    }

    /// Look up an environment by name.
    pub fn get(&self, name: &str) -> Option<&EnvironmentRecord> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// Look up an environment by id.
    pub fn get_by_id(&self, id: &EnvironmentId) -> Option<&EnvironmentRecord> {
        self.environments.iter().find(|e| &e.id == id)
    }

    /// Last observed stamp of an environment.
    pub fn stamp(&self, name: &str) -> Option<&VersionStamp> {
        self.get(name).map(|e| &e.version_stamp)
    }

    /// The materialized environment, if any.
    pub fn current(&self) -> Option<&str> {
        Some(self.current.as_str()).filter(|c| !c.is_empty())
    }

    /// Whether the server's view of an environment differs from ours.
    ///
    /// An environment we have never recorded counts as stale.
    pub fn is_stale(&self, remote: &EnvironmentRecord) -> bool {
        self.get_by_id(&remote.id)
            .or_else(|| self.get(&remote.name))
            .map_or(true, |local| local.version_stamp != remote.version_stamp)
    }

    /// Insert or update a record, matching by id first, then by name.
    pub fn upsert(&mut self, record: EnvironmentRecord) {
        let existing = self
            .environments
            .iter()
            .position(|e| e.id == record.id)
            .or_else(|| self.environments.iter().position(|e| e.name == record.name));
        match existing {
            Some(index) => self.environments[index] = record,
            None => {
                self.environments.push(record);
                self.environments.sort_by(|a, b| a.name.cmp(&b.name));
            }
        }
    }

    /// Remove an environment by name.
    pub fn remove(&mut self, name: &str) -> Option<EnvironmentRecord> {
        let index = self.environments.iter().position(|e| e.name == name)?;
        Some(self.environments.remove(index))
    }

    /// Names of all known environments, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.environments.iter().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }
}
