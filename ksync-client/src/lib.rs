//! # ksync-client
//!
//! Client library for ksync: encrypted, per-environment secret and file sync.
//!
//! ## Features
//!
//! - **Per-device encryption**: X25519 + HKDF + XChaCha20-Poly1305, one message
//!   per recipient device, authenticated to the sending device
//! - **Atomic local cache**: snapshots are swapped in whole, never half-written
//! - **Optimistic conflict checks**: writes are rejected when a fetch or a
//!   version stamp shows the local view is out of date
//! - **Relay abstraction**: pluggable relay (HTTP, mock)
//!
//! ## Example
//!
//! ```ignore
//! use ksync_client::{ClientConfig, DeviceIdentity, HttpRelay, SecretStore, SyncEngine};
//!
//! let config = ClientConfig::from_file(Path::new("ksync.toml"))?;
//! let identity = DeviceIdentity::load(&config.cache_dir).await?;
//! let relay = HttpRelay::new(&config.api_url, token, config.request_timeout())?;
//! let store = SecretStore::open(&config.cache_dir, &config.working_dir, declarations)?;
//! let engine = SyncEngine::new(relay, store, identity, &config.project_id)?;
//!
//! let report = engine.fetch().await?;
//! engine.materialize("prod").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod atomic;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod guard;
pub mod manifest;
pub mod relay;
pub mod store;

pub use config::{ClientConfig, ConfigError, DeviceIdentity};
pub use crypto::{decrypt, encrypt, CryptoError, DeviceKeyPair, KEY_SIZE, NONCE_SIZE};
pub use engine::{EnvironmentFailure, FetchReport, SyncEngine};
pub use error::{Result, SyncError};
pub use guard::{MutationBase, VersionGuard};
pub use manifest::Manifest;
pub use relay::{HttpRelay, MockRelay, Relay, TransportError};
pub use store::{FileEntry, MaterializeReport, Origin, SecretEntry, SecretStore};
