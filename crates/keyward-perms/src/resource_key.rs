//! Per-resource symmetric keys.
//!
//! Every resource has one 256-bit key. The server only ever holds it for the
//! instant between minting and wrapping: it is wrapped for each member's
//! public key and then dropped, which zeroizes it.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use keyward_core::{UserId, WrappedKey};

use crate::crypto::{self, PrivateKey, PublicKey, KEY_LEN};
use crate::error::{CryptoError, Result};

/// A resource's symmetric key.
///
/// Not `Clone`: there is exactly one owner of the plaintext key at a time.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ResourceKey([u8; KEY_LEN]);

impl ResourceKey {
    /// Generate a random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from unwrapped bytes, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyMaterial(format!(
                "resource key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Wrap this key for one recipient.
    pub fn wrap_for(&self, recipient: &PublicKey) -> Result<WrappedKey> {
        crypto::wrap(&self.0, recipient).map(WrappedKey::from_bytes)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResourceKey(..)")
    }
}

/// A resource key wrapped for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedKey {
    pub user_id: UserId,
    pub wrapped_key: WrappedKey,
}

/// Recover a resource key from a member's wrapped copy.
pub fn unwrap_resource_key(wrapped: &WrappedKey, private_key: &PrivateKey) -> Result<ResourceKey> {
    let bytes = crypto::unwrap(wrapped.as_bytes(), private_key)?;
    ResourceKey::from_slice(&bytes).map_err(|_| CryptoError::DecryptionFailed)
}

/// Mints resource keys and wraps them for members.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceKeyService;

impl ResourceKeyService {
    /// Create the service.
    pub fn new() -> Self {
        Self
    }

    /// Mint a fresh 256-bit key.
    pub fn generate_resource_key(&self) -> ResourceKey {
        ResourceKey::generate()
    }

    /// Mint a key and wrap it for the creator only.
    pub fn issue_initial_membership(&self, creator: &PublicKey) -> Result<WrappedKey> {
        let key = self.generate_resource_key();
        key.wrap_for(creator)
    }

    /// Mint one key and wrap it for every recipient.
    ///
    /// All or nothing: a single wrap failure returns the error and no keys.
    pub fn issue_for_members(&self, recipients: &[(UserId, PublicKey)]) -> Result<Vec<IssuedKey>> {
        let key = self.generate_resource_key();
        Self::wrap_all(&key, recipients)
    }

    /// Rotate: a fresh key wrapped for every remaining member.
    ///
    /// Removed members keep whatever key they already had; only content
    /// written after the rotation is out of their reach.
    pub fn rekey(&self, recipients: &[(UserId, PublicKey)]) -> Result<Vec<IssuedKey>> {
        self.issue_for_members(recipients)
    }

    /// Wrap an existing key for every recipient.
    pub fn wrap_all(key: &ResourceKey, recipients: &[(UserId, PublicKey)]) -> Result<Vec<IssuedKey>> {
        recipients
            .iter()
            .map(|(user_id, public_key)| {
                Ok(IssuedKey {
                    user_id: *user_id,
                    wrapped_key: key.wrap_for(public_key)?,
                })
            })
            .collect()
    }
}
