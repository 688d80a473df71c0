//! Relay message schema for ksync.
//!
//! These are the records the relay stores and returns. The `payload` of a
//! message is ciphertext and opaque to the relay; only the routing fields
//! (recipient, environment, sender) are visible to it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{DeviceId, EnvironmentId, MessageId, PublicKey, UserId, VersionStamp};

/// An environment as listed by the server: `{id, name, versionStamp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    /// Server-assigned environment identifier.
    pub id: EnvironmentId,
    /// Human-readable name (`dev`, `staging`, `prod`, ...).
    pub name: String,
    /// Current version stamp.
    pub version_stamp: VersionStamp,
}

impl EnvironmentRecord {
    /// Create a record.
    pub fn new(id: EnvironmentId, name: &str, version_stamp: VersionStamp) -> Self {
        Self {
            id,
            name: name.to_string(),
            version_stamp,
        }
    }
}

/// A pending encrypted message addressed to one device for one environment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Relay-assigned id, used to acknowledge (delete) the message.
    pub id: MessageId,
    /// Account of the recipient.
    pub recipient_user_id: UserId,
    /// Device of the recipient.
    pub recipient_id: DeviceId,
    /// Environment the payload describes.
    pub environment_id: EnvironmentId,
    /// Account of the sender. Empty on legacy records.
    #[serde(default)]
    pub sender_user_id: UserId,
    /// Device of the sender, when the relay recorded it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_device_id: Option<DeviceId>,
    /// Ciphertext produced by the sender for this recipient.
    #[serde(default, with = "crate::base64_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Whether the message carries ciphertext.
    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Legacy records have no sender and cannot be authenticated.
    pub fn is_legacy(&self) -> bool {
        self.sender_user_id.is_empty()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("recipient_user_id", &self.recipient_user_id)
            .field("recipient_id", &self.recipient_id)
            .field("environment_id", &self.environment_id)
            .field("sender_user_id", &self.sender_user_id)
            .field("sender_device_id", &self.sender_device_id)
            .field("payload", &format!("[{} bytes]", self.payload.len()))
            .finish()
    }
}

/// One slot of the `GetMessages` response: an accessible environment and
/// the message pending for this device, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentMessages {
    /// The environment as currently known by the server.
    pub environment: EnvironmentRecord,
    /// Pending message for the requesting device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

/// A message to upload, before the relay assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToWrite {
    /// Account of the recipient.
    pub recipient_user_id: UserId,
    /// Device of the recipient.
    pub recipient_id: DeviceId,
    /// Environment the payload describes.
    pub environment_id: EnvironmentId,
    /// Account of the sender.
    pub sender_user_id: UserId,
    /// Device of the sender.
    pub sender_device_id: DeviceId,
    /// Ciphertext for the recipient.
    #[serde(with = "crate::base64_bytes")]
    pub payload: Vec<u8>,
    /// Whether accepting this message should mint a new version stamp.
    pub update_version: bool,
}

/// A batch of messages uploaded in one `SendMessages` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBatch {
    /// Messages across all environments and recipients.
    pub messages: Vec<MessageToWrite>,
}

impl MessageBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: MessageToWrite) {
        self.messages.push(message);
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the batch has no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Environments touched by this batch.
    pub fn environments(&self) -> BTreeSet<EnvironmentId> {
        self.messages
            .iter()
            .map(|m| m.environment_id.clone())
            .collect()
    }
}

/// Server answer to `SendMessages`: the updated environments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Environments with their (possibly new) version stamps.
    pub environments: Vec<EnvironmentRecord>,
}

/// A device authorized to read an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceKey {
    /// Owner of the device.
    pub user_id: UserId,
    /// The device.
    pub device_id: DeviceId,
    /// Its long-lived public key.
    pub public_key: PublicKey,
}
