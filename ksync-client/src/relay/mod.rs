//! Relay abstraction for ksync.
//!
//! The relay stores encrypted messages for devices and answers directory
//! lookups (which devices may read an environment, what a user's public key
//! is). It never sees plaintext.
//!
//! # Design
//!
//! The relay trait is async and request-oriented:
//! - `get_messages()` lists the pending message per accessible environment
//! - `send_messages()` uploads one batch and returns the resulting stamps
//! - `delete_message()` acknowledges a consumed message
//! - `get_environment_public_keys()` / `get_user_public_key()` resolve keys
//!
//! # Example
//!
//! ```ignore
//! let relay = MockRelay::new();
//! let prod = relay.add_environment("prod");
//! let slots = relay.get_messages("project", &device_uid).await?;
//! ```

mod http;
mod mock;

pub use http::HttpRelay;
pub use mock::{MockRelay, RegisteredDevice};

use async_trait::async_trait;
use ksync_types::{
    DeviceId, DeviceKey, EnvironmentId, EnvironmentMessages, MessageBatch, MessageId, PublicKey,
    SendReceipt, UserId,
};
use thiserror::Error;

/// Relay errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server rejected our credentials.
    #[error("unauthorized: log in again")]
    Unauthorized,

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server could not be reached or timed out.
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    /// The server answered with an unexpected status.
    #[error("relay returned status {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The server's answer could not be decoded.
    #[error("could not decode relay response: {0}")]
    Decode(String),

    /// The server refused the request (e.g. unknown recipient).
    #[error("relay rejected request: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether this error means the resource is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }
}

/// Relay trait for exchanging encrypted environment messages.
///
/// Implementations handle the underlying mechanism (HTTP, in-memory mock).
#[async_trait]
pub trait Relay: Send + Sync {
    /// List every environment of `project_id` this device may read, each with
    /// the message pending for the device, if any.
    async fn get_messages(
        &self,
        project_id: &str,
        device_uid: &str,
    ) -> Result<Vec<EnvironmentMessages>, TransportError>;

    /// Upload a batch of messages in one request.
    ///
    /// Returns the touched environments with their version stamps after the
    /// upload.
    async fn send_messages(&self, batch: &MessageBatch) -> Result<SendReceipt, TransportError>;

    /// Delete a consumed message. Deleting an unknown id yields `NotFound`.
    async fn delete_message(&self, id: MessageId) -> Result<(), TransportError>;

    /// Devices authorized to read an environment, with their public keys.
    async fn get_environment_public_keys(
        &self,
        environment: &EnvironmentId,
    ) -> Result<Vec<DeviceKey>, TransportError>;

    /// Public key of a user's device.
    ///
    /// With `device` set, that exact device's key; otherwise the user's
    /// first registered device.
    async fn get_user_public_key(
        &self,
        user: &UserId,
        device: Option<DeviceId>,
    ) -> Result<PublicKey, TransportError>;
}
