//! Caller-facing error taxonomy for ksync-client.

use std::path::PathBuf;
use thiserror::Error;

use ksync_core::Change;
use ksync_types::UserId;

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::relay::TransportError;

/// Result alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the sync engine and the local store.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The relay failed or refused a request.
    #[error("relay error: {0}")]
    Transport(#[from] TransportError),

    /// A message for an environment could not be opened.
    #[error("cannot decrypt message for environment {environment}: {source}")]
    Crypto {
        /// Environment the message was for.
        environment: String,
        /// Underlying crypto error.
        #[source]
        source: CryptoError,
    },

    /// The local copy of an environment is behind the server and no message
    /// is available to catch up.
    #[error("environment {environment} is out of date; ask a member to send it again")]
    StaleState {
        /// Environment name.
        environment: String,
    },

    /// A local write would overwrite a value that changed remotely.
    #[error("conflict on {name} in environment {environment}; fetch before writing")]
    Conflict {
        /// Environment name.
        environment: String,
        /// Secret name or file path.
        name: String,
        /// The remote change, when known.
        change: Option<Change>,
    },

    /// Reading or writing the local cache failed.
    #[error("cache I/O error at {path}: {source}")]
    CacheIo {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A local cache file exists but cannot be decoded.
    #[error("corrupt cache file {path}: {reason}")]
    CorruptCache {
        /// File that failed to decode.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// A required tracked file has no cached content.
    #[error("required file {path} is missing for environment {environment}")]
    MissingFile {
        /// Environment name.
        environment: String,
        /// Tracked path.
        path: String,
    },

    /// A recipient has no public key for an environment.
    #[error("{recipient} has no device key for environment {environment}")]
    NoPublicKeyForRecipient {
        /// Recipient account.
        recipient: UserId,
        /// Environment name.
        environment: String,
    },

    /// No environment with this name is known locally.
    #[error("unknown environment {name}")]
    UnknownEnvironment {
        /// Environment name.
        name: String,
    },

    /// The materialized environment cannot be removed.
    #[error("cannot remove environment {name}: it is the current environment")]
    CannotRemoveCurrent {
        /// Environment name.
        name: String,
    },

    /// A decrypted payload could not be decoded.
    #[error("invalid payload for environment {environment}: {reason}")]
    Payload {
        /// Environment name.
        environment: String,
        /// What was wrong.
        reason: String,
    },

    /// A tracked path is absolute or escapes the project tree.
    #[error("invalid tracked path {path}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: ksync_core::PathError,
    },

    /// Configuration or identity could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Whether the operation can succeed after a fetch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }

    /// Environment this error is scoped to, if any.
    pub fn environment(&self) -> Option<&str> {
        match self {
            SyncError::Crypto { environment, .. }
            | SyncError::StaleState { environment }
            | SyncError::Conflict { environment, .. }
            | SyncError::MissingFile { environment, .. }
            | SyncError::NoPublicKeyForRecipient { environment, .. }
            | SyncError::Payload { environment, .. } => Some(environment),
            SyncError::UnknownEnvironment { name } | SyncError::CannotRemoveCurrent { name } => {
                Some(name)
            }
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> SyncError {
        let path = path.into();
        move |source| SyncError::CacheIo { path, source }
    }
}
