//! Configuration for ksync-client.
//!
//! Two files:
//! - `ksync.toml`: project settings (relay URL, project id, directories)
//! - `device.json`: this device's identity and secret key (mode 0600)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ksync_types::{DeviceId, PublicKey, UserId};

use crate::crypto::DeviceKeyPair;

const IDENTITY_FILE: &str = "device.json";

/// Project-level client configuration, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the relay API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Project whose environments are synced.
    pub project_id: String,
    /// Directory holding the local cache (default: `.ksync`).
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Project root where tracked files are materialized (default: `.`).
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Per-request timeout in seconds (default: 20).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default value functions
fn default_api_url() -> String {
    "http://127.0.0.1:9001".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".ksync")
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_request_timeout_secs() -> u64 {
    20
}

impl ClientConfig {
    /// Configuration with defaults for everything but the project.
    pub fn new(project_id: &str) -> Self {
        Self {
            api_url: default_api_url(),
            project_id: project_id.to_string(),
            cache_dir: default_cache_dir(),
            working_dir: default_working_dir(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// This device's identity: who it belongs to and its long-lived key.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Owner account.
    pub user_id: UserId,
    /// Relay-assigned device id.
    pub device_id: DeviceId,
    /// Opaque uid used to list this device's messages.
    pub device_uid: String,
    /// Published public key.
    pub public_key: PublicKey,
    /// Hex-encoded X25519 secret key.
    secret_key_hex: String,
}

impl DeviceIdentity {
    /// Create an identity with a fresh key pair and a random device uid.
    pub fn generate(user_id: UserId, device_id: DeviceId) -> Result<Self, ConfigError> {
        let pair = DeviceKeyPair::generate().map_err(|e| ConfigError::InvalidIdentity {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_key_pair(
            user_id,
            device_id,
            uuid::Uuid::new_v4().to_string(),
            &pair,
        ))
    }

    /// Create an identity from an existing key pair.
    pub fn from_key_pair(
        user_id: UserId,
        device_id: DeviceId,
        device_uid: String,
        pair: &DeviceKeyPair,
    ) -> Self {
        Self {
            user_id,
            device_id,
            device_uid,
            public_key: pair.public_key(),
            secret_key_hex: hex::encode(&pair.secret_bytes()[..]),
        }
    }

    /// Rebuild the key pair, checking it matches the stored public key.
    pub fn key_pair(&self) -> Result<DeviceKeyPair, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidIdentity {
            path: PathBuf::from(IDENTITY_FILE),
            reason,
        };
        let bytes = zeroize::Zeroizing::new(
            hex::decode(&self.secret_key_hex).map_err(|e| invalid(e.to_string()))?,
        );
        let pair = DeviceKeyPair::from_secret_bytes(&bytes).map_err(|e| invalid(e.to_string()))?;
        if pair.public_key() != self.public_key {
            return Err(invalid("secret key does not match public key".into()));
        }
        Ok(pair)
    }

    /// Load the identity from a directory.
    pub async fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(IDENTITY_FILE);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::ReadError {
                path: path.clone(),
                source: e,
            })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::InvalidIdentity {
            path,
            reason: e.to_string(),
        })
    }

    /// Save the identity to a directory, readable by the owner only.
    pub async fn save(&self, data_dir: &Path) -> Result<(), ConfigError> {
        let path = data_dir.join(IDENTITY_FILE);
        let contents =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidIdentity {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| ConfigError::WriteError {
                path: path.clone(),
                source: e,
            })?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Check if an identity is stored.
    pub async fn exists(data_dir: &Path) -> bool {
        tokio::fs::try_exists(data_dir.join(IDENTITY_FILE))
            .await
            .unwrap_or(false)
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("device_uid", &self.device_uid)
            .field("public_key", &self.public_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to write a configuration file.
    #[error("failed to write config file {path}: {source}")]
    WriteError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The device identity is corrupt or inconsistent.
    #[error("invalid device identity {path}: {reason}")]
    InvalidIdentity {
        /// Path to the identity file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(r#"project_id = "p-123""#).unwrap();
        assert_eq!(config, ClientConfig::new("p-123"));
        assert_eq!(config.request_timeout(), Duration::from_secs(20));
        assert_eq!(config.cache_dir, PathBuf::from(".ksync"));
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
api_url = "https://relay.example.com"
project_id = "p-9"
cache_dir = "/var/cache/ksync"
working_dir = "/srv/app"
request_timeout_secs = 5
"#;
        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.api_url, "https://relay.example.com");
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/ksync"));
        assert_eq!(config.working_dir, PathBuf::from("/srv/app"));
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn missing_project_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ksync.toml");
        std::fs::write(&path, "api_url = \"http://x\"\n").unwrap();

        assert!(matches!(
            ClientConfig::from_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ClientConfig::from_file(&dir.path().join("nope.toml")),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[tokio::test]
    async fn identity_roundtrip() {
        let dir = tempdir().unwrap();
        let identity = DeviceIdentity::generate(UserId::new("alice@github"), DeviceId::new(4)).unwrap();
        identity.save(dir.path()).await.unwrap();

        assert!(DeviceIdentity::exists(dir.path()).await);
        let loaded = DeviceIdentity::load(dir.path()).await.unwrap();
        assert_eq!(loaded.user_id, identity.user_id);
        assert_eq!(loaded.device_uid, identity.device_uid);
        assert_eq!(
            loaded.key_pair().unwrap().public_key(),
            identity.public_key
        );
    }

    #[tokio::test]
    async fn tampered_public_key_is_detected() {
        let mut identity =
            DeviceIdentity::generate(UserId::new("alice"), DeviceId::new(1)).unwrap();
        identity.public_key = PublicKey::from_array([9u8; 32]);

        assert!(matches!(
            identity.key_pair(),
            Err(ConfigError::InvalidIdentity { .. })
        ));
    }

    #[test]
    fn identity_debug_is_redacted() {
        let identity = DeviceIdentity::generate(UserId::new("alice"), DeviceId::new(1)).unwrap();
        let debug = format!("{:?}", identity);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&identity.secret_key_hex));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn identity_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let identity = DeviceIdentity::generate(UserId::new("alice"), DeviceId::new(1)).unwrap();
        identity.save(dir.path()).await.unwrap();

        let path = dir.path().join(IDENTITY_FILE);
        let perms = tokio::fs::metadata(&path).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600, "file should be 0600");
    }
}
