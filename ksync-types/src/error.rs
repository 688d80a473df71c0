//! Error types for ksync wire data.

use thiserror::Error;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Payload JSON could not be produced or parsed.
    #[error("payload encoding failed: {0}")]
    Json(#[source] serde_json::Error),

    /// A file's content was not valid base64.
    #[error("file {path} has invalid base64 content")]
    InvalidBase64 {
        /// Path of the offending file entry.
        path: String,
        /// Decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// A public key had the wrong length or encoding.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::InvalidPublicKey("expected 32 bytes, got 3".into());
        assert_eq!(err.to_string(), "invalid public key: expected 32 bytes, got 3");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
