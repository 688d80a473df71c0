//! SyncEngine: fetch and send encrypted environment snapshots.
//!
//! # Architecture
//!
//! ```text
//! caller → SyncEngine → Relay → server
//!             ↓   ↓
//!     SecretStore  crypto
//!             ↓
//!      ksync-core (diff, conflict verdicts)
//! ```
//!
//! One engine is built per invocation and owns the store for its lifetime.
//!
//! # Example
//!
//! ```ignore
//! let engine = SyncEngine::new(relay, store, identity, "project-id")?;
//! let report = engine.fetch().await?;
//! for failure in &report.failures {
//!     eprintln!("{}: {}", failure.environment, failure.error);
//! }
//! engine.set_secret("prod", "PORT", "4000", None).await?;
//! engine.send(&["prod"]).await?;
//! ```

use ksync_core::{Change, ChangeKind, ChangesByEnvironment, Snapshot};
use ksync_types::{
    EnvironmentRecord, Message, MessageBatch, MessageId, MessageToWrite, Payload, SendReceipt,
    UserId,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DeviceIdentity;
use crate::crypto::{self, CryptoError, DeviceKeyPair};
use crate::error::{Result, SyncError};
use crate::guard::{MutationBase, VersionGuard};
use crate::relay::Relay;
use crate::store::{MaterializeReport, SecretStore};

/// An environment that could not be brought up to date during a fetch.
#[derive(Debug)]
pub struct EnvironmentFailure {
    /// Environment name.
    pub environment: String,
    /// What went wrong (`Crypto`, `Payload`, `InvalidPath` or `StaleState`).
    pub error: SyncError,
}

/// Outcome of a fetch.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Changes applied per environment. Environments that were already up to
    /// date appear with an empty list.
    pub changes: ChangesByEnvironment,
    /// Environments that failed; the others were still processed.
    pub failures: Vec<EnvironmentFailure>,
}

impl FetchReport {
    /// Whether every environment was brought up to date.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The sync engine for one device and one project.
pub struct SyncEngine<R: Relay> {
    relay: R,
    store: SecretStore,
    identity: DeviceIdentity,
    keys: DeviceKeyPair,
    project_id: String,
    last_fetch: Mutex<Option<ChangesByEnvironment>>,
}

impl<R: Relay> SyncEngine<R> {
    /// Create an engine. Fails if the identity's key pair is inconsistent.
    pub fn new(
        relay: R,
        store: SecretStore,
        identity: DeviceIdentity,
        project_id: impl Into<String>,
    ) -> Result<Self> {
        let keys = identity.key_pair()?;
        Ok(Self {
            relay,
            store,
            identity,
            keys,
            project_id: project_id.into(),
            last_fetch: Mutex::new(None),
        })
    }

    /// The local store.
    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    /// This device's identity.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Changes reported by the last completed fetch, if any.
    pub async fn last_changes(&self) -> Option<ChangesByEnvironment> {
        self.last_fetch.lock().await.clone()
    }

    // ===== Fetch =====

    /// Pull pending messages and bring every readable environment up to date.
    ///
    /// Per-environment failures are collected in the report. Listing and
    /// deletion failures and cache I/O errors abort the fetch.
    pub async fn fetch(&self) -> Result<FetchReport> {
        let mut slots = self
            .relay
            .get_messages(&self.project_id, &self.identity.device_uid)
            .await?;
        slots.sort_by(|a, b| a.environment.name.cmp(&b.environment.name));
        debug!(environments = slots.len(), "fetched message listing");

        let manifest = self.store.manifest()?;
        let mut report = FetchReport::default();
        let mut consumed: Vec<MessageId> = Vec::new();

        for slot in slots {
            let environment = slot.environment.name.clone();
            match slot.message {
                Some(message) => match self.apply_message(&slot.environment, &message).await {
                    Ok(changes) => {
                        info!(
                            environment = %environment,
                            changes = changes.len(),
                            "environment updated"
                        );
                        report.changes.insert(environment, changes);
                        consumed.push(message.id);
                    }
                    Err(error) if is_environment_scoped(&error) => {
                        warn!(environment = %environment, error = %error, "skipping environment");
                        report.failures.push(EnvironmentFailure { environment, error });
                    }
                    Err(error) => return Err(error),
                },
                None if manifest.is_stale(&slot.environment) => {
                    warn!(
                        environment = %environment,
                        remote = %slot.environment.version_stamp,
                        "environment advanced without a message for this device"
                    );
                    report.failures.push(EnvironmentFailure {
                        environment: environment.clone(),
                        error: SyncError::StaleState { environment },
                    });
                }
                None => report.changes.insert(environment, Vec::new()),
            }
        }

        for id in consumed {
            match self.relay.delete_message(id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!(message = %id, "message already deleted"),
                Err(e) => return Err(e.into()),
            }
        }

        *self.last_fetch.lock().await = Some(report.changes.clone());
        Ok(report)
    }

    /// Decrypt one message and replace the environment's snapshot with it.
    async fn apply_message(
        &self,
        record: &EnvironmentRecord,
        message: &Message,
    ) -> Result<Vec<Change>> {
        let environment = record.name.as_str();
        let scoped = |source: CryptoError| SyncError::Crypto {
            environment: environment.to_string(),
            source,
        };
        let malformed = |reason: String| SyncError::Payload {
            environment: environment.to_string(),
            reason,
        };

        if message.is_legacy() {
            return Err(scoped(CryptoError::UnknownSender));
        }
        let sender_key = match self
            .relay
            .get_user_public_key(&message.sender_user_id, message.sender_device_id)
            .await
        {
            Ok(key) => key,
            Err(e) if e.is_not_found() => return Err(scoped(CryptoError::UnknownSender)),
            Err(e) => return Err(e.into()),
        };

        let plaintext = crypto::decrypt(&self.keys, &sender_key, &message.payload).map_err(scoped)?;
        let payload = Payload::from_json_bytes(&plaintext).map_err(|e| malformed(e.to_string()))?;
        let new = Snapshot::from_payload(&payload).map_err(|e| malformed(e.to_string()))?;

        let previous = match self.store.load_snapshot(environment) {
            Ok(previous) => previous,
            Err(SyncError::CorruptCache { path, reason }) => {
                warn!(
                    environment,
                    path = %path.display(),
                    reason = %reason,
                    "cached snapshot unreadable, replacing it"
                );
                Snapshot::new()
            }
            Err(e) => return Err(e),
        };
        let changes = previous.changes_to(&new);

        // The stamp is recorded only after the snapshot is in place. If the
        // manifest write fails the fetch aborts before deleting the message,
        // so the next fetch applies it again.
        self.store.replace_snapshot(environment, &new)?;
        self.store.update_environment(record.clone())?;
        Ok(changes)
    }

    // ===== Send =====

    /// Send the full local snapshot of each environment to every device that
    /// may read it, except this one, and adopt the new version stamps.
    pub async fn send(&self, environments: &[&str]) -> Result<SendReceipt> {
        let batch = self.build_batch(environments, None).await?;
        let receipt = self.upload(&batch).await?;
        self.store.adopt_versions(&receipt.environments)?;
        Ok(receipt)
    }

    /// Send environments to the devices of one member only.
    ///
    /// The messages do not advance the version stamps, so local stamps are
    /// left as they are.
    pub async fn send_to_member(
        &self,
        environments: &[&str],
        recipient: &UserId,
    ) -> Result<SendReceipt> {
        let batch = self.build_batch(environments, Some(recipient)).await?;
        self.upload(&batch).await
    }

    async fn build_batch(
        &self,
        environments: &[&str],
        member: Option<&UserId>,
    ) -> Result<MessageBatch> {
        let mut batch = MessageBatch::new();
        for &name in environments {
            let record = self.store.environment(name)?;
            let plaintext = self
                .store
                .load_snapshot(name)?
                .to_payload()
                .to_json_bytes()
                .map_err(|e| SyncError::Payload {
                    environment: name.to_string(),
                    reason: e.to_string(),
                })?;

            let recipients: Vec<_> = self
                .relay
                .get_environment_public_keys(&record.id)
                .await?
                .into_iter()
                .filter(|key| {
                    !(key.user_id == self.identity.user_id
                        && key.device_id == self.identity.device_id)
                })
                .filter(|key| member.map_or(true, |m| &key.user_id == m))
                .collect();

            if let Some(member) = member {
                if recipients.is_empty() {
                    return Err(SyncError::NoPublicKeyForRecipient {
                        recipient: member.clone(),
                        environment: name.to_string(),
                    });
                }
            }

            for key in recipients {
                let payload = crypto::encrypt(&self.keys, &key.public_key, &plaintext).map_err(
                    |source| SyncError::Crypto {
                        environment: name.to_string(),
                        source,
                    },
                )?;
                batch.push(MessageToWrite {
                    recipient_user_id: key.user_id,
                    recipient_id: key.device_id,
                    environment_id: record.id.clone(),
                    sender_user_id: self.identity.user_id.clone(),
                    sender_device_id: self.identity.device_id,
                    payload,
                    update_version: member.is_none(),
                });
            }
        }
        Ok(batch)
    }

    async fn upload(&self, batch: &MessageBatch) -> Result<SendReceipt> {
        if batch.is_empty() {
            debug!("no recipients, nothing to upload");
            return Ok(SendReceipt::default());
        }
        let receipt = self.relay.send_messages(batch).await?;
        info!(
            messages = batch.len(),
            environments = receipt.environments.len(),
            "batch sent"
        );
        Ok(receipt)
    }

    // ===== Local state =====

    /// Materialize an environment into the working tree.
    ///
    /// Out-of-band edits to the currently materialized files are logged
    /// before they are overwritten.
    pub async fn materialize(&self, environment: &str) -> Result<MaterializeReport> {
        if let Some(current) = self.store.current_environment()? {
            let modified = self.store.locally_modified(&current)?;
            if !modified.is_empty() {
                warn!(
                    environment = %current,
                    files = ?modified,
                    "discarding local edits to tracked files"
                );
            }
        }
        self.store.materialize(environment)
    }

    /// Tracked files edited in the working tree since materialization.
    pub async fn locally_modified(&self, environment: &str) -> Result<Vec<String>> {
        self.store.locally_modified(environment)
    }

    /// Whether writing the `kind` entry `name` in `environment` now would conflict.
    pub async fn check_conflict(
        &self,
        environment: &str,
        kind: ChangeKind,
        name: &str,
    ) -> Result<(bool, Option<Change>)> {
        let last_fetch = self.last_fetch.lock().await;
        VersionGuard::new(&self.store, last_fetch.as_ref()).check_conflict(environment, kind, name)
    }

    /// Capture the current base of an environment for later writes.
    pub async fn base(&self, environment: &str) -> Result<MutationBase> {
        let last_fetch = self.last_fetch.lock().await;
        VersionGuard::new(&self.store, last_fetch.as_ref()).capture(environment)
    }

    async fn guard_write(
        &self,
        environment: &str,
        kind: ChangeKind,
        name: &str,
        base: Option<&MutationBase>,
    ) -> Result<()> {
        let last_fetch = self.last_fetch.lock().await;
        VersionGuard::new(&self.store, last_fetch.as_ref()).require(environment, kind, name, base)
    }

    /// Set a secret, guarded against conflicting remote changes.
    pub async fn set_secret(
        &self,
        environment: &str,
        name: &str,
        value: &str,
        base: Option<&MutationBase>,
    ) -> Result<()> {
        self.guard_write(environment, ChangeKind::Secret, name, base)
            .await?;
        self.store.set_secret(environment, name, value)
    }

    /// Remove a secret, guarded against conflicting remote changes.
    pub async fn unset_secret(
        &self,
        environment: &str,
        name: &str,
        base: Option<&MutationBase>,
    ) -> Result<()> {
        self.guard_write(environment, ChangeKind::Secret, name, base)
            .await?;
        self.store.unset_secret(environment, name)
    }

    /// Set a tracked file's content, guarded against conflicting remote changes.
    pub async fn set_file(
        &self,
        environment: &str,
        path: &str,
        content: &[u8],
        base: Option<&MutationBase>,
    ) -> Result<()> {
        self.guard_write(environment, ChangeKind::File, path, base)
            .await?;
        self.store.set_file(environment, path, content)
    }

    /// Remove a tracked file, guarded against conflicting remote changes.
    pub async fn remove_file(
        &self,
        environment: &str,
        path: &str,
        base: Option<&MutationBase>,
    ) -> Result<()> {
        self.guard_write(environment, ChangeKind::File, path, base)
            .await?;
        self.store.remove_file(environment, path)
    }
}

impl<R: Relay> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("project_id", &self.project_id)
            .field("identity", &self.identity)
            .field("store", &self.store)
            .finish()
    }
}

/// Errors that spoil one environment without stopping the fetch.
fn is_environment_scoped(error: &SyncError) -> bool {
    matches!(
        error,
        SyncError::Crypto { .. } | SyncError::Payload { .. } | SyncError::InvalidPath { .. }
    )
}
