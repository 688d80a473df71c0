//! # ksync-types
//!
//! Wire format types for ksync, the encrypted per-environment secret sync.
//!
//! This crate provides the foundational types shared by the other ksync crates:
//! - [`EnvironmentId`], [`UserId`], [`DeviceId`], [`MessageId`] - identity types
//! - [`VersionStamp`] - opaque, equality-only environment version token
//! - [`PublicKey`] - a device's long-lived X25519 public key
//! - [`Message`], [`MessageBatch`], [`SendReceipt`] - what the relay stores and returns
//! - [`Payload`] - the plaintext snapshot carried inside an encrypted message
//! - [`TypesError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod payload;

pub use error::TypesError;
pub use ids::{DeviceId, EnvironmentId, MessageId, PublicKey, UserId, VersionStamp, PUBLIC_KEY_SIZE};
pub use messages::{
    DeviceKey, EnvironmentMessages, EnvironmentRecord, Message, MessageBatch, MessageToWrite,
    SendReceipt,
};
pub use payload::{FileValue, Payload, SecretValue};

/// Serde adapter storing byte vectors as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
