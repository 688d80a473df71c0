//! Plaintext payload carried inside an encrypted message.
//!
//! A payload is always the full snapshot of one environment at send time,
//! never a delta.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::TypesError;

/// One secret entry: `{label, value}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretValue {
    /// Secret name, e.g. `DATABASE_URL`.
    pub label: String,
    /// Secret value.
    pub value: String,
}

impl SecretValue {
    /// Create a secret entry.
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretValue")
            .field("label", &self.label)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// One tracked file entry: `{path, value}` with base64 content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileValue {
    /// Path relative to the project root.
    pub path: String,
    /// Standard base64 of the file bytes.
    #[serde(alias = "content")]
    pub value: String,
}

impl FileValue {
    /// Build an entry from raw bytes.
    pub fn from_bytes(path: impl Into<String>, content: &[u8]) -> Self {
        Self {
            path: path.into(),
            value: STANDARD.encode(content),
        }
    }

    /// Decode the file bytes.
    pub fn decode(&self) -> Result<Vec<u8>, TypesError> {
        STANDARD
            .decode(self.value.as_bytes())
            .map_err(|source| TypesError::InvalidBase64 {
                path: self.path.clone(),
                source,
            })
    }
}

/// Full snapshot of one environment's secrets and files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Secrets, in label order.
    #[serde(default)]
    pub secrets: Vec<SecretValue>,
    /// Files, in path order.
    #[serde(default)]
    pub files: Vec<FileValue>,
}

impl Payload {
    /// Whether the payload carries neither secrets nor files.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty() && self.files.is_empty()
    }

    /// Encode as JSON bytes (the plaintext that gets encrypted).
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::Json)
    }

    /// Decode from JSON bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_json_shape() {
        let payload = Payload {
            secrets: vec![SecretValue::new("PORT", "3000")],
            files: vec![FileValue::from_bytes("config/app.yml", b"a: 1\n")],
        };
        let json: serde_json::Value =
            serde_json::from_slice(&payload.to_json_bytes().unwrap()).unwrap();
        assert_eq!(json["secrets"][0]["label"], "PORT");
        assert_eq!(json["secrets"][0]["value"], "3000");
        assert_eq!(json["files"][0]["path"], "config/app.yml");
        assert_eq!(json["files"][0]["value"], "YTogMQo=");
    }

    #[test]
    fn file_content_alias_accepted() {
        let json = br#"{"secrets":[],"files":[{"path":"a.txt","content":"aGk="}]}"#;
        let payload = Payload::from_json_bytes(json).unwrap();
        assert_eq!(payload.files[0].decode().unwrap(), b"hi");
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let payload = Payload::from_json_bytes(b"{}").unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn invalid_base64_names_the_file() {
        let file = FileValue {
            path: "bad.bin".into(),
            value: "!!!not base64".into(),
        };
        match file.decode() {
            Err(TypesError::InvalidBase64 { path, .. }) => assert_eq!(path, "bad.bin"),
            other => panic!("expected InvalidBase64, got {:?}", other),
        }
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(
            Payload::from_json_bytes(b"not json"),
            Err(TypesError::Json(_))
        ));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let debug = format!("{:?}", SecretValue::new("API_KEY", "hunter2"));
        assert!(debug.contains("API_KEY"));
        assert!(!debug.contains("hunter2"));
    }
}
