//! Error types for the cryptography and policy layer.

use thiserror::Error;

/// Errors that can occur while wrapping, unwrapping or escrowing keys.
///
/// `DecryptionFailed` and `PinInvalid` carry no detail on purpose: callers
/// must not be able to tell a wrong key from tampered bytes.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Plaintext is larger than the wrap scheme accepts.
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Wrong key, malformed input or tampered ciphertext.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The PIN did not authenticate the escrowed key.
    #[error("invalid PIN")]
    PinInvalid,

    /// Key bytes of the wrong shape.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// KDF parameter or hashing failure.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// AEAD encryption failure.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Envelope encoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
