//! In-memory relay for tests and demos.
//!
//! Behaves like a small relay server: it mints version stamps when a batch
//! asks for a version bump, keeps at most one pending message per
//! (recipient device, environment), and supports failure injection.

use super::{Relay, TransportError};
use async_trait::async_trait;
use ksync_types::{
    DeviceId, DeviceKey, EnvironmentId, EnvironmentMessages, EnvironmentRecord, Message,
    MessageBatch, MessageId, PublicKey, SendReceipt, UserId, VersionStamp,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A device registered with the mock relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredDevice {
    /// Owner of the device.
    pub user_id: UserId,
    /// Numeric id assigned by the relay.
    pub device_id: DeviceId,
    /// Opaque uid the device uses to list its messages.
    pub device_uid: String,
}

/// Mock relay for testing.
///
/// Clones share state, so two engines holding clones talk to the same server.
#[derive(Debug, Default)]
pub struct MockRelay {
    inner: Arc<Mutex<MockRelayInner>>,
}

#[derive(Debug, Default)]
struct MockRelayInner {
    environments: BTreeMap<EnvironmentId, MockEnvironment>,
    devices: BTreeMap<DeviceId, MockDevice>,
    messages: BTreeMap<MessageId, Message>,
    next_message_id: u64,
    next_device_id: u64,
    sent_batches: Vec<MessageBatch>,
    deleted: Vec<MessageId>,
    fail_next_get: Option<TransportError>,
    fail_next_send: Option<TransportError>,
    fail_next_delete: Option<TransportError>,
    fail_next_keys: Option<TransportError>,
}

#[derive(Debug)]
struct MockEnvironment {
    name: String,
    version: u64,
    stamp: VersionStamp,
    readers: BTreeSet<DeviceId>,
}

#[derive(Debug)]
struct MockDevice {
    uid: String,
    user_id: UserId,
    public_key: PublicKey,
}

impl MockRelayInner {
    fn record(&self, id: &EnvironmentId) -> Option<EnvironmentRecord> {
        self.environments
            .get(id)
            .map(|env| EnvironmentRecord::new(id.clone(), &env.name, env.stamp.clone()))
    }
}

impl MockRelay {
    /// Create an empty mock relay.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockRelayInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an environment with stamp `v1`. Its id is `env-<name>`.
    pub fn add_environment(&self, name: &str) -> EnvironmentId {
        let id = EnvironmentId::new(format!("env-{}", name));
        let mut inner = self.lock();
        inner.environments.insert(
            id.clone(),
            MockEnvironment {
                name: name.to_string(),
                version: 1,
                stamp: VersionStamp::new("v1"),
                readers: BTreeSet::new(),
            },
        );
        id
    }

    /// Register a device for a user.
    pub fn register_device(&self, user: &str, public_key: PublicKey) -> RegisteredDevice {
        let mut inner = self.lock();
        inner.next_device_id += 1;
        let device_id = DeviceId::new(inner.next_device_id);
        let device_uid = format!("device-{}", device_id);
        inner.devices.insert(
            device_id,
            MockDevice {
                uid: device_uid.clone(),
                user_id: UserId::new(user),
                public_key,
            },
        );
        RegisteredDevice {
            user_id: UserId::new(user),
            device_id,
            device_uid,
        }
    }

    /// Allow a device to read an environment.
    pub fn grant(&self, environment: &EnvironmentId, device: DeviceId) {
        let mut inner = self.lock();
        if let Some(env) = inner.environments.get_mut(environment) {
            env.readers.insert(device);
        }
    }

    /// Revoke a device's access to an environment.
    pub fn revoke(&self, environment: &EnvironmentId, device: DeviceId) {
        let mut inner = self.lock();
        if let Some(env) = inner.environments.get_mut(environment) {
            env.readers.remove(&device);
        }
    }

    /// Current stamp of an environment.
    pub fn stamp(&self, environment: &EnvironmentId) -> Option<VersionStamp> {
        let inner = self.lock();
        inner.environments.get(environment).map(|e| e.stamp.clone())
    }

    /// Mint a new stamp without any message, as another client's send would.
    pub fn bump_version(&self, environment: &EnvironmentId) -> Option<VersionStamp> {
        let mut inner = self.lock();
        let env = inner.environments.get_mut(environment)?;
        env.version += 1;
        env.stamp = VersionStamp::new(format!("v{}", env.version));
        Some(env.stamp.clone())
    }

    /// Messages currently pending on the server.
    pub fn pending_messages(&self) -> Vec<Message> {
        let inner = self.lock();
        inner.messages.values().cloned().collect()
    }

    /// Every batch accepted so far.
    pub fn sent_batches(&self) -> Vec<MessageBatch> {
        let inner = self.lock();
        inner.sent_batches.clone()
    }

    /// Ids deleted so far, in order.
    pub fn deleted_messages(&self) -> Vec<MessageId> {
        let inner = self.lock();
        inner.deleted.clone()
    }

    /// Store a raw message, as a legacy or foreign client might.
    pub fn inject_message(&self, mut message: Message) -> MessageId {
        let mut inner = self.lock();
        inner.next_message_id += 1;
        message.id = MessageId::new(inner.next_message_id);
        let id = message.id;
        let (recipient, env) = (message.recipient_id, message.environment_id.clone());
        inner
            .messages
            .retain(|_, m| !(m.recipient_id == recipient && m.environment_id == env));
        inner.messages.insert(id, message);
        id
    }

    /// Cause the next get_messages() to fail with the given error.
    pub fn fail_next_get(&self, error: TransportError) {
        self.lock().fail_next_get = Some(error);
    }

    /// Cause the next send_messages() to fail with the given error.
    pub fn fail_next_send(&self, error: TransportError) {
        self.lock().fail_next_send = Some(error);
    }

    /// Cause the next delete_message() to fail with the given error.
    pub fn fail_next_delete(&self, error: TransportError) {
        self.lock().fail_next_delete = Some(error);
    }

    /// Cause the next key lookup to fail with the given error.
    pub fn fail_next_keys(&self, error: TransportError) {
        self.lock().fail_next_keys = Some(error);
    }
}

impl Clone for MockRelay {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn get_messages(
        &self,
        _project_id: &str,
        device_uid: &str,
    ) -> Result<Vec<EnvironmentMessages>, TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_get.take() {
            return Err(error);
        }

        let device = inner
            .devices
            .iter()
            .find(|(_, d)| d.uid == device_uid)
            .map(|(id, _)| *id)
            .ok_or(TransportError::Unauthorized)?;

        let slots = inner
            .environments
            .iter()
            .filter(|(_, env)| env.readers.contains(&device))
            .map(|(id, env)| EnvironmentMessages {
                environment: EnvironmentRecord::new(id.clone(), &env.name, env.stamp.clone()),
                message: inner
                    .messages
                    .values()
                    .find(|m| m.recipient_id == device && &m.environment_id == id)
                    .cloned(),
            })
            .collect();
        Ok(slots)
    }

    async fn send_messages(&self, batch: &MessageBatch) -> Result<SendReceipt, TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(error);
        }

        // Validate the whole batch before storing anything.
        for msg in &batch.messages {
            let env = inner.environments.get(&msg.environment_id).ok_or_else(|| {
                TransportError::Rejected(format!("unknown environment {}", msg.environment_id))
            })?;
            if !env.readers.contains(&msg.recipient_id) {
                return Err(TransportError::Rejected(format!(
                    "device {} may not read {}",
                    msg.recipient_id, env.name
                )));
            }
        }

        for msg in &batch.messages {
            inner.next_message_id += 1;
            let id = MessageId::new(inner.next_message_id);
            inner.messages.retain(|_, m| {
                !(m.recipient_id == msg.recipient_id && m.environment_id == msg.environment_id)
            });
            inner.messages.insert(
                id,
                Message {
                    id,
                    recipient_user_id: msg.recipient_user_id.clone(),
                    recipient_id: msg.recipient_id,
                    environment_id: msg.environment_id.clone(),
                    sender_user_id: msg.sender_user_id.clone(),
                    sender_device_id: Some(msg.sender_device_id),
                    payload: msg.payload.clone(),
                },
            );
        }

        let bumped: BTreeSet<EnvironmentId> = batch
            .messages
            .iter()
            .filter(|m| m.update_version)
            .map(|m| m.environment_id.clone())
            .collect();
        for id in &bumped {
            if let Some(env) = inner.environments.get_mut(id) {
                env.version += 1;
                env.stamp = VersionStamp::new(format!("v{}", env.version));
            }
        }

        let environments = batch
            .environments()
            .iter()
            .filter_map(|id| inner.record(id))
            .collect();
        inner.sent_batches.push(batch.clone());
        Ok(SendReceipt { environments })
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_delete.take() {
            return Err(error);
        }

        inner
            .messages
            .remove(&id)
            .ok_or_else(|| TransportError::NotFound(format!("message {}", id)))?;
        inner.deleted.push(id);
        Ok(())
    }

    async fn get_environment_public_keys(
        &self,
        environment: &EnvironmentId,
    ) -> Result<Vec<DeviceKey>, TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_keys.take() {
            return Err(error);
        }

        let env = inner
            .environments
            .get(environment)
            .ok_or_else(|| TransportError::NotFound(format!("environment {}", environment)))?;
        let keys = env
            .readers
            .iter()
            .filter_map(|id| {
                inner.devices.get(id).map(|d| DeviceKey {
                    user_id: d.user_id.clone(),
                    device_id: *id,
                    public_key: d.public_key,
                })
            })
            .collect();
        Ok(keys)
    }

    async fn get_user_public_key(
        &self,
        user: &UserId,
        device: Option<DeviceId>,
    ) -> Result<PublicKey, TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_keys.take() {
            return Err(error);
        }

        inner
            .devices
            .iter()
            .filter(|(_, d)| &d.user_id == user)
            .find(|(id, _)| device.map_or(true, |wanted| **id == wanted))
            .map(|(_, d)| d.public_key)
            .ok_or_else(|| TransportError::NotFound(format!("public key of {}", user)))
    }
}
