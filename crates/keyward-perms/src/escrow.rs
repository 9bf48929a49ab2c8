//! PIN escrow of user private keys.
//!
//! A user's private key is stored server-side only as ciphertext under a
//! key derived from their PIN with Argon2id. The PIN itself is kept as a
//! separate Argon2id PHC hash so a wrong PIN can be rejected before any
//! decryption attempt.
//!
//! Escrow ciphertext layout: `nonce (12) || ciphertext || tag (16)`.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{CryptoError, Result};

/// Length of the per-escrow KDF salt.
pub const SALT_LEN: usize = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// 64 MiB, 3 passes, 4 lanes.
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Never use in production.
    pub const fn light() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// A private key encrypted under a PIN-derived key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowedKey {
    /// `nonce || ciphertext || tag`.
    pub ciphertext: Vec<u8>,
    /// KDF salt, fresh per escrow.
    pub salt: [u8; SALT_LEN],
}

impl fmt::Debug for EscrowedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscrowedKey")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// An Argon2id PHC string for PIN verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinHash(String);

impl PinHash {
    /// Wrap a stored PHC string.
    pub fn from_phc(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The PHC string for storage.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PinHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PinHash(..)")
    }
}

/// Derives PIN keys, escrows private keys and verifies PINs.
#[derive(Debug, Clone, Default)]
pub struct PinEscrowService {
    params: KdfParams,
}

impl PinEscrowService {
    /// Create a service with the given KDF cost.
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    /// The KDF cost in use.
    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Derive a 256-bit wrapping key from a PIN and salt.
    pub fn derive_wrapping_key(&self, pin: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let argon2 = self.params.argon2()?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(pin.as_bytes(), salt, key.as_mut_slice())
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }

    /// Encrypt a private key under a PIN with a fresh salt and nonce.
    pub fn escrow_private_key(&self, private_key: &[u8], pin: &str) -> Result<EscrowedKey> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let key = self.derive_wrapping_key(pin, &salt)?;
        let nonce = crypto::random_nonce();
        let sealed = crypto::seal(&key, &nonce, private_key)?;

        let mut ciphertext = Vec::with_capacity(NONCE_LEN + sealed.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&sealed);
        Ok(EscrowedKey { ciphertext, salt })
    }

    /// Decrypt an escrowed private key.
    ///
    /// Fails with [`CryptoError::PinInvalid`] when the PIN does not
    /// authenticate the ciphertext. Never returns partial bytes.
    pub fn recover_private_key(
        &self,
        ciphertext: &[u8],
        pin: &str,
        salt: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            debug!(len = ciphertext.len(), "escrow ciphertext too short");
            return Err(CryptoError::PinInvalid);
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| CryptoError::PinInvalid)?;

        let key = self.derive_wrapping_key(pin, salt)?;
        crypto::open(&key, &nonce, sealed)
            .map(Zeroizing::new)
            .map_err(|_| {
                debug!("escrow ciphertext did not authenticate");
                CryptoError::PinInvalid
            })
    }

    /// Hash a PIN for later verification.
    pub fn hash_pin(&self, pin: &str) -> Result<PinHash> {
        let salt = SaltString::generate(&mut OsRng);
        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());
        let hash = self
            .params
            .argon2()?
            .hash_password(&pin_bytes, &salt)
            .map_err(|e| CryptoError::KeyDerivation(format!("failed to hash PIN: {e}")))?;
        Ok(PinHash(hash.to_string()))
    }

    /// Check a PIN against its stored hash.
    ///
    /// The hash carries its own parameters, so hashes made under older
    /// settings still verify.
    pub fn verify_pin(&self, pin: &str, hash: &PinHash) -> bool {
        let parsed = match PasswordHash::new(&hash.0) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "stored PIN hash is malformed");
                return false;
            }
        };
        Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok()
    }
}
