//! VersionGuard: optimistic write-conflict check for local mutations.
//!
//! A write to an entry of environment E is allowed when either
//! - the caller supplies a [`MutationBase`] whose stamp is still E's current
//!   stamp, or
//! - the last fetch covered E and did not change the entry.
//!
//! Anything else is a [`SyncError::Conflict`]; the caller refetches and retries.

use ksync_core::{evaluate, Change, ChangeKind, ChangesByEnvironment, Verdict};
use ksync_types::VersionStamp;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::store::SecretStore;

/// The version of an environment a mutation was based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBase {
    /// Environment name.
    pub environment: String,
    /// Stamp observed when the base was read.
    pub stamp: VersionStamp,
}

impl MutationBase {
    /// Base for an environment at a given stamp.
    pub fn new(environment: impl Into<String>, stamp: VersionStamp) -> Self {
        Self {
            environment: environment.into(),
            stamp,
        }
    }
}

/// Checks intended writes against the manifest and the last fetch.
pub struct VersionGuard<'a> {
    store: &'a SecretStore,
    last_fetch: Option<&'a ChangesByEnvironment>,
}

impl<'a> VersionGuard<'a> {
    /// Guard over `store`, vouched for by `last_fetch` when a fetch just ran.
    pub fn new(store: &'a SecretStore, last_fetch: Option<&'a ChangesByEnvironment>) -> Self {
        Self { store, last_fetch }
    }

    /// Capture the current base of an environment.
    pub fn capture(&self, environment: &str) -> Result<MutationBase> {
        Ok(MutationBase::new(
            environment,
            self.store.stamp(environment)?,
        ))
    }

    /// Evaluate a write without failing on conflict.
    ///
    /// A base captured for another environment does not count.
    pub fn verdict(
        &self,
        environment: &str,
        kind: ChangeKind,
        name: &str,
        base: Option<&MutationBase>,
    ) -> Result<Verdict> {
        let current = self.store.stamp(environment)?;
        let base = base
            .filter(|b| b.environment == environment)
            .map(|b| &b.stamp);
        Ok(evaluate(environment, kind, name, base, &current, self.last_fetch))
    }

    /// Whether a write would conflict, and the change behind it if known.
    pub fn check_conflict(
        &self,
        environment: &str,
        kind: ChangeKind,
        name: &str,
    ) -> Result<(bool, Option<Change>)> {
        match self.verdict(environment, kind, name, None)? {
            Verdict::Clear => Ok((false, None)),
            Verdict::Conflict { change, .. } => Ok((true, change)),
        }
    }

    /// Fail with [`SyncError::Conflict`] unless the write may proceed.
    pub fn require(
        &self,
        environment: &str,
        kind: ChangeKind,
        name: &str,
        base: Option<&MutationBase>,
    ) -> Result<()> {
        match self.verdict(environment, kind, name, base)? {
            Verdict::Clear => Ok(()),
            Verdict::Conflict { reason, change } => {
                debug!(environment, ?kind, name, ?reason, "write rejected");
                Err(SyncError::Conflict {
                    environment: environment.to_string(),
                    name: name.to_string(),
                    change,
                })
            }
        }
    }
}
