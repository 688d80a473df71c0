//! Change records produced by comparing two snapshots.
//!
//! Changes are derived data: they are reported to the user and consulted by
//! the conflict check, but never persisted.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// What kind of entry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A secret value.
    Secret,
    /// A tracked file's content.
    File,
}

/// One entry whose value differs between two snapshots.
///
/// An empty `from` means the entry was added; an empty `to` means it was
/// removed.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    /// Secret or file.
    pub kind: ChangeKind,
    /// Secret name or file path.
    pub name: String,
    /// Previous value (empty when added).
    pub from: String,
    /// New value (empty when removed).
    pub to: String,
}

impl Change {
    /// Create a change record.
    pub fn new(
        kind: ChangeKind,
        name: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// The entry did not exist before.
    pub fn is_addition(&self) -> bool {
        self.from.is_empty()
    }

    /// The entry no longer exists.
    pub fn is_removal(&self) -> bool {
        self.to.is_empty()
    }
}

// Values can be secrets; Debug only shows the shape of the change.
impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match (self.is_addition(), self.is_removal()) {
            (true, _) => "added",
            (_, true) => "removed",
            _ => "modified",
        };
        f.debug_struct("Change")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("op", &op)
            .finish()
    }
}

/// Changes grouped by environment name, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangesByEnvironment(BTreeMap<String, Vec<Change>>);

impl ChangesByEnvironment {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the changes for one environment, replacing any previous entry.
    ///
    /// Environments whose diff is empty are still recorded, so callers can tell
    /// "fetched, nothing changed" from "not fetched".
    pub fn insert(&mut self, environment: impl Into<String>, changes: Vec<Change>) {
        self.0.insert(environment.into(), changes);
    }

    /// Changes for one environment, if it was part of the fetch.
    pub fn get(&self, environment: &str) -> Option<&[Change]> {
        self.0.get(environment).map(Vec::as_slice)
    }

    /// Whether the environment was part of the fetch.
    pub fn contains(&self, environment: &str) -> bool {
        self.0.contains_key(environment)
    }

    /// Find the change to an entry in an environment.
    ///
    /// Secrets and files live in separate namespaces.
    pub fn find(&self, environment: &str, kind: ChangeKind, name: &str) -> Option<&Change> {
        self.get(environment)?
            .iter()
            .find(|c| c.kind == kind && c.name == name)
    }

    /// Iterate `(environment, changes)` in environment-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Change])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of environments recorded.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no environment was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of changes across environments.
    pub fn total_changes(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}
