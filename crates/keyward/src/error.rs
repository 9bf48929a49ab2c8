//! Error types for the engine.

use keyward_core::ResourceId;
use keyward_perms::CryptoError;
use keyward_store::StoreError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The actor's role does not allow the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed request: length mismatch, empty key, limit exceeded.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Resource, membership or user key material does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The sole owner tried to leave while other members remain.
    #[error("sole owner of {resource} must transfer ownership before leaving")]
    OwnerMustTransferFirst { resource: ResourceId },

    /// The change would leave the resource without an owner.
    #[error("cannot demote the last owner of {resource}")]
    LastOwnerDemotion { resource: ResourceId },

    /// The two users already share a direct room.
    #[error("a direct room already exists: {resource}")]
    DirectRoomExists { resource: ResourceId },

    /// Cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A blocking task failed to complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Message safe to show to the caller.
    ///
    /// Decryption and PIN failures collapse into one message so the caller
    /// cannot tell which check failed.
    pub fn public_message(&self) -> String {
        match self {
            Error::Crypto(CryptoError::DecryptionFailed | CryptoError::PinInvalid) => {
                "cannot decrypt: wrong key or PIN".to_string()
            }
            Error::Store(_) | Error::Internal(_) => "internal error".to_string(),
            Error::Crypto(CryptoError::KeyDerivation(_) | CryptoError::Encryption(_)) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether the caller is at fault (4xx) rather than the server (5xx).
    pub fn is_client_error(&self) -> bool {
        match self {
            Error::PermissionDenied(_)
            | Error::InvalidInput(_)
            | Error::NotFound(_)
            | Error::OwnerMustTransferFirst { .. }
            | Error::LastOwnerDemotion { .. }
            | Error::DirectRoomExists { .. } => true,
            Error::Crypto(e) => matches!(
                e,
                CryptoError::DecryptionFailed
                    | CryptoError::PinInvalid
                    | CryptoError::PayloadTooLarge { .. }
                    | CryptoError::InvalidKeyMaterial(_)
            ),
            Error::Store(_) | Error::Internal(_) => false,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
