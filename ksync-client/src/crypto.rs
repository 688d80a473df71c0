//! Cryptographic primitives for ksync.
//!
//! This module provides:
//! - Long-lived X25519 device key pairs
//! - Authenticated public-key encryption of one payload from one device to another
//!
//! Every message is sealed for exactly one (sender, recipient) pair with no
//! handshake: the static-static X25519 shared secret is expanded with
//! HKDF-SHA256 into a per-direction key, and the payload is encrypted with
//! XChaCha20-Poly1305. Only the recipient can open it, and a successful
//! open proves the sender's private key produced it.
//!
//! # Wire format
//!
//! ```text
//! version (1) || nonce (24) || ciphertext + tag
//! ```
//!
//! # Security Notes
//!
//! - XChaCha20 uses 192-bit nonces (24 bytes), safe for random generation
//! - The HKDF info and the AEAD associated data both bind the ordered key
//!   pair, so a message from A to B does not open as a message from B to A
//! - Low-order public keys are rejected

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use ksync_types::{PublicKey, PUBLIC_KEY_SIZE};
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for X25519 secrets and XChaCha20-Poly1305 keys (32 bytes).
pub const KEY_SIZE: usize = 32;

/// Current ciphertext format version.
pub const FORMAT_VERSION: u8 = 1;

const TAG_SIZE: usize = 16;
const HEADER_SIZE: usize = 1 + NONCE_SIZE;
const HKDF_SALT: &[u8] = b"ksync-signcryption-v1";

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    ///
    /// Returned for tampered ciphertext, the wrong key pair, or a message
    /// sealed for the opposite direction.
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Ciphertext is too short to hold a header and tag.
    #[error("malformed ciphertext")]
    Malformed,

    /// Ciphertext was produced by an unknown format version.
    #[error("unsupported ciphertext version: {0}")]
    UnsupportedVersion(u8),

    /// The peer public key is a low-order point.
    #[error("invalid peer public key")]
    InvalidPublicKey,

    /// The message names no sender with a known key, so it cannot be authenticated.
    #[error("message sender is unknown")]
    UnknownSender,
}

/// A device's long-lived X25519 key pair.
///
/// The secret half is zeroized on drop.
pub struct DeviceKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl DeviceKeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        getrandom::getrandom(&mut bytes[..])
            .map_err(|e| CryptoError::EncryptionFailed(format!("getrandom failed: {}", e)))?;
        Ok(Self::from_secret(StaticSecret::from(*bytes)))
    }

    /// Restore a key pair from its 32 secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        let array = Zeroizing::new(array);
        Ok(Self::from_secret(StaticSecret::from(*array)))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = x25519_dalek::PublicKey::from(&secret);
        Self {
            public: PublicKey::from_array(public.to_bytes()),
            secret,
        }
    }

    /// The public half, as published to the key directory.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// The secret bytes, for persisting the device identity.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    fn message_cipher(
        &self,
        sender: &PublicKey,
        recipient: &PublicKey,
        peer: &PublicKey,
    ) -> Result<XChaCha20Poly1305, CryptoError> {
        let shared = self
            .secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(*peer.as_bytes()));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey);
        }

        let mut info = [0u8; 2 * PUBLIC_KEY_SIZE];
        info[..PUBLIC_KEY_SIZE].copy_from_slice(sender.as_bytes());
        info[PUBLIC_KEY_SIZE..].copy_from_slice(recipient.as_bytes());

        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        hkdf.expand(&info, &mut key[..])
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        XChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

fn associated_data(sender: &PublicKey, recipient: &PublicKey) -> [u8; 1 + 2 * PUBLIC_KEY_SIZE] {
    let mut aad = [0u8; 1 + 2 * PUBLIC_KEY_SIZE];
    aad[0] = FORMAT_VERSION;
    aad[1..1 + PUBLIC_KEY_SIZE].copy_from_slice(sender.as_bytes());
    aad[1 + PUBLIC_KEY_SIZE..].copy_from_slice(recipient.as_bytes());
    aad
}

/// Seal `plaintext` from `sender` to `recipient`.
///
/// Each call draws a fresh random nonce, so sealing the same plaintext twice
/// yields different ciphertexts.
pub fn encrypt(
    sender: &DeviceKeyPair,
    recipient: &PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let sender_pk = sender.public_key();
    let cipher = sender.message_cipher(&sender_pk, recipient, recipient)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce_bytes)
        .map_err(|e| CryptoError::EncryptionFailed(format!("getrandom failed: {}", e)))?;

    let aad = associated_data(&sender_pk, recipient);
    let sealed = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + sealed.len());
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a ciphertext that `sender` sealed for `recipient`.
pub fn decrypt(
    recipient: &DeviceKeyPair,
    sender: &PublicKey,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let version = *ciphertext.first().ok_or(CryptoError::Malformed)?;
    if version != FORMAT_VERSION {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    if ciphertext.len() < HEADER_SIZE + TAG_SIZE {
        return Err(CryptoError::Malformed);
    }

    let recipient_pk = recipient.public_key();
    let cipher = recipient.message_cipher(sender, &recipient_pk, sender)?;
    let aad = associated_data(sender, &recipient_pk);

    cipher
        .decrypt(
            XNonce::from_slice(&ciphertext[1..HEADER_SIZE]),
            Payload {
                msg: &ciphertext[HEADER_SIZE..],
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}
