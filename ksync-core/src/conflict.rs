//! Write-conflict decision.
//!
//! A local write to an entry of environment E may only proceed when the
//! writer's view of E is provably current. There is no merge: any doubt
//! rejects the write and the user refetches.

use ksync_types::VersionStamp;

use crate::changes::{Change, ChangeKind, ChangesByEnvironment};

/// Result of checking one intended write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The write may proceed.
    Clear,
    /// The write must be rejected.
    Conflict {
        /// Why the write was rejected.
        reason: ConflictReason,
        /// The change from the last fetch touching the entry, if any.
        change: Option<Change>,
    },
}

impl Verdict {
    /// Whether the write must be rejected.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Verdict::Conflict { .. })
    }
}

/// Why a write was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The stamp the write was based on is no longer current.
    StaleBase,
    /// The last fetch changed the entry about to be overwritten.
    ChangedByFetch,
    /// Neither a fetch nor a base stamp vouches for the local view.
    NoBase,
}

/// Decide whether a write to the `kind` entry `name` in `environment` may
/// proceed.
///
/// - `base`: the stamp captured before the write's base read, if any.
/// - `current`: the stamp currently recorded locally for the environment.
/// - `last_fetch`: changes from the fetch that just completed, if any.
///
/// An explicit base decides on its own: it either matches `current` or the
/// write is stale (with the fetched change attached when there is one).
/// Without a base, the last fetch must cover the environment and must not
/// have changed the entry.
pub fn evaluate(
    environment: &str,
    kind: ChangeKind,
    name: &str,
    base: Option<&VersionStamp>,
    current: &VersionStamp,
    last_fetch: Option<&ChangesByEnvironment>,
) -> Verdict {
    let change = last_fetch
        .and_then(|changes| changes.find(environment, kind, name))
        .cloned();

    if let Some(base) = base {
        if base == current {
            return Verdict::Clear;
        }
        return Verdict::Conflict {
            reason: ConflictReason::StaleBase,
            change,
        };
    }

    if change.is_some() {
        return Verdict::Conflict {
            reason: ConflictReason::ChangedByFetch,
            change,
        };
    }

    if !last_fetch.is_some_and(|changes| changes.contains(environment)) {
        return Verdict::Conflict {
            reason: ConflictReason::NoBase,
            change: None,
        };
    }

    Verdict::Clear
}
