//! Asymmetric key service.
//!
//! Per-user key pairs and a sealed-box wrap for short payloads (resource
//! keys). Wrapping uses an ephemeral X25519 agreement, a BLAKE3-derived
//! key bound to both public keys, and ChaCha20-Poly1305.
//!
//! Wire layout of a wrapped payload:
//!
//! ```text
//! ephemeral_public (32) || nonce (12) || ciphertext || tag (16)
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use x25519_dalek::{EphemeralSecret, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Length of an X25519 public or private key.
pub const KEY_LEN: usize = 32;

/// Length of a ChaCha20-Poly1305 nonce.
pub const NONCE_LEN: usize = 12;

/// Length of the Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;

/// Largest plaintext `wrap` accepts.
///
/// Matches the RSA-2048/OAEP-SHA256 ceiling so payload sizing stays
/// compatible with clients built around that limit.
pub const MAX_WRAP_PAYLOAD: usize = 190;

const HEADER_LEN: usize = KEY_LEN + NONCE_LEN;

const WRAP_CONTEXT: &str = "keyward-perms-v1-wrap";

// ────────────────────────────────────────────────────────────────────────────
// Keys
// ────────────────────────────────────────────────────────────────────────────

/// A user's public key (X25519, 32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; KEY_LEN]);

impl PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyMaterial(format!(
                "public key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    fn to_dalek(self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl From<x25519_dalek::PublicKey> for PublicKey {
    fn from(pk: x25519_dalek::PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// A user's private key.
///
/// Zeroized on drop. Only ever leaves this type as zeroizing bytes.
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    /// Generate a new key from the OS RNG.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Create from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: Zeroizing<[u8; KEY_LEN]> =
            Zeroizing::new(bytes.try_into().map_err(|_| {
                CryptoError::InvalidKeyMaterial(format!(
                    "private key must be {} bytes, got {}",
                    KEY_LEN,
                    bytes.len()
                ))
            })?);
        Ok(Self::from_bytes(*arr))
    }

    /// Export the raw bytes.
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_LEN]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// Derive the matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(x25519_dalek::PublicKey::from(&self.0))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Generate a fresh key pair.
pub fn generate_keypair() -> (PrivateKey, PublicKey) {
    let private_key = PrivateKey::generate();
    let public_key = private_key.public_key();
    (private_key, public_key)
}

// ────────────────────────────────────────────────────────────────────────────
// Wrap / unwrap
// ────────────────────────────────────────────────────────────────────────────

/// Seal `plaintext` so only the holder of `recipient`'s private key can read it.
pub fn wrap(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>> {
    if plaintext.len() > MAX_WRAP_PAYLOAD {
        return Err(CryptoError::PayloadTooLarge {
            len: plaintext.len(),
            max: MAX_WRAP_PAYLOAD,
        });
    }

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(x25519_dalek::PublicKey::from(&ephemeral));
    let shared = ephemeral.diffie_hellman(&recipient.to_dalek());
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKeyMaterial(
            "recipient public key has low order".into(),
        ));
    }

    let key = derive_wrap_key(shared.as_bytes(), &ephemeral_public, recipient);
    let nonce = random_nonce();
    let sealed = seal(&key, &nonce, plaintext)?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a payload produced by [`wrap`].
///
/// Every failure is reported as [`CryptoError::DecryptionFailed`].
pub fn unwrap(wrapped: &[u8], private_key: &PrivateKey) -> Result<Zeroizing<Vec<u8>>> {
    if wrapped.len() < HEADER_LEN + TAG_LEN {
        debug!(len = wrapped.len(), "wrapped payload too short");
        return Err(CryptoError::DecryptionFailed);
    }

    let (ephemeral, rest) = wrapped.split_at(KEY_LEN);
    let (nonce, sealed) = rest.split_at(NONCE_LEN);
    let ephemeral_public =
        PublicKey::from_slice(ephemeral).map_err(|_| CryptoError::DecryptionFailed)?;
    let nonce: [u8; NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let shared = private_key.0.diffie_hellman(&ephemeral_public.to_dalek());
    if !shared.was_contributory() {
        debug!("wrapped payload carries a low-order ephemeral key");
        return Err(CryptoError::DecryptionFailed);
    }

    let key = derive_wrap_key(shared.as_bytes(), &ephemeral_public, &private_key.public_key());
    open(&key, &nonce, sealed)
        .map(Zeroizing::new)
        .map_err(|e| {
            debug!(error = %e, "wrapped payload did not authenticate");
            CryptoError::DecryptionFailed
        })
}

fn derive_wrap_key(
    shared: &[u8; KEY_LEN],
    ephemeral_public: &PublicKey,
    recipient: &PublicKey,
) -> Zeroizing<[u8; KEY_LEN]> {
    let mut hasher = blake3::Hasher::new_derive_key(WRAP_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral_public.as_bytes());
    hasher.update(recipient.as_bytes());
    Zeroizing::new(*hasher.finalize().as_bytes())
}

// ────────────────────────────────────────────────────────────────────────────
// AEAD helpers shared with escrow and the content envelope
// ────────────────────────────────────────────────────────────────────────────

/// Generate a random 96-bit nonce.
pub(crate) fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// ChaCha20-Poly1305 encrypt.
pub(crate) fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// ChaCha20-Poly1305 decrypt.
pub(crate) fn open(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let (private_key, public_key) = generate_keypair();
        let key = [0x42u8; 32];

        let wrapped = wrap(&key, &public_key).unwrap();
        assert_eq!(wrapped.len(), HEADER_LEN + key.len() + TAG_LEN);

        let unwrapped = unwrap(&wrapped, &private_key).unwrap();
        assert_eq!(unwrapped.as_slice(), &key);
    }

    #[test]
    fn test_wrap_is_randomized() {
        let (_, public_key) = generate_keypair();
        let a = wrap(b"same", &public_key).unwrap();
        let b = wrap(b"same", &public_key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unwrap_wrong_key_fails() {
        let (_, public_key) = generate_keypair();
        let (other, _) = generate_keypair();

        let wrapped = wrap(b"secret", &public_key).unwrap();
        assert!(matches!(
            unwrap(&wrapped, &other),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_payload_limit() {
        let (private_key, public_key) = generate_keypair();

        let at_limit = vec![7u8; MAX_WRAP_PAYLOAD];
        let wrapped = wrap(&at_limit, &public_key).unwrap();
        assert_eq!(unwrap(&wrapped, &private_key).unwrap().as_slice(), &at_limit[..]);

        let over = vec![7u8; MAX_WRAP_PAYLOAD + 1];
        assert!(matches!(
            wrap(&over, &public_key),
            Err(CryptoError::PayloadTooLarge { len, max }) if len == MAX_WRAP_PAYLOAD + 1 && max == MAX_WRAP_PAYLOAD
        ));
    }

    #[test]
    fn test_truncated_input_fails() {
        let (private_key, _) = generate_keypair();
        assert!(matches!(
            unwrap(&[0u8; HEADER_LEN], &private_key),
            Err(CryptoError::DecryptionFailed)
        ));
        assert!(unwrap(&[], &private_key).is_err());
    }

    #[test]
    fn test_low_order_recipient_rejected() {
        let zero = PublicKey::from_bytes([0u8; KEY_LEN]);
        assert!(matches!(
            wrap(b"k", &zero),
            Err(CryptoError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_key_serialization() {
        let (private_key, public_key) = generate_keypair();

        let parsed = PublicKey::from_hex(&public_key.to_hex()).unwrap();
        assert_eq!(parsed, public_key);

        let restored = PrivateKey::from_slice(private_key.to_bytes().as_slice()).unwrap();
        assert_eq!(restored.public_key(), public_key);

        assert!(PublicKey::from_hex("00ff").is_err());
        assert!(PrivateKey::from_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_keypairs_are_fresh() {
        let (_, a) = generate_keypair();
        let (_, b) = generate_keypair();
        assert_ne!(a, b);
    }

    #[test]
    fn test_private_key_debug_redacted() {
        let (private_key, _) = generate_keypair();
        assert_eq!(format!("{:?}", private_key), "PrivateKey(..)");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_roundtrip_any_payload(payload in prop::collection::vec(any::<u8>(), 0..=MAX_WRAP_PAYLOAD)) {
            let (private_key, public_key) = generate_keypair();
            let wrapped = wrap(&payload, &public_key).unwrap();
            let opened = unwrap(&wrapped, &private_key).unwrap();
            prop_assert_eq!(opened.as_slice(), payload.as_slice());
        }

        #[test]
        fn test_any_bit_flip_fails(
            payload in prop::collection::vec(any::<u8>(), 1..64),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let (private_key, public_key) = generate_keypair();
            let mut wrapped = wrap(&payload, &public_key).unwrap();
            let i = position.index(wrapped.len());
            wrapped[i] ^= 1 << bit;
            prop_assert!(unwrap(&wrapped, &private_key).is_err());
        }
    }
}
