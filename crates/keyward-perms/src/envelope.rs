//! Content envelope.
//!
//! Resource content (cell values, messages) is encrypted under the
//! resource key and wrapped in a CBOR envelope carrying the format and
//! nonce. Clients normally do this themselves; the server-side cipher
//! exists for migrations and for hosts that hold a key transiently.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::{self, NONCE_LEN};
use crate::error::{CryptoError, Result};
use crate::resource_key::ResourceKey;

/// Format identifier for encrypted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncryptionFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// An encrypted content envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedContent {
    /// Encryption algorithm used.
    pub format: EncryptionFormat,

    /// Nonce used for encryption (unique per encryption).
    pub nonce: [u8; NONCE_LEN],

    /// The encrypted data (includes authentication tag).
    pub ciphertext: Vec<u8>,
}

impl EncryptedContent {
    /// Encrypt plaintext under a resource key.
    pub fn seal(plaintext: &[u8], key: &ResourceKey) -> Result<Self> {
        let nonce = crypto::random_nonce();
        let ciphertext = crypto::seal(key.as_bytes(), &nonce, plaintext)?;
        Ok(Self {
            format: EncryptionFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt with a resource key.
    pub fn open(&self, key: &ResourceKey) -> Result<Vec<u8>> {
        match self.format {
            EncryptionFormat::ChaCha20Poly1305 => {
                crypto::open(key.as_bytes(), &self.nonce, &self.ciphertext)
            }
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CryptoError::Serialization(e.to_string()))
    }
}

/// Outcome of decrypting a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    /// The value decrypted normally.
    Plaintext(Vec<u8>),
    /// The value could not be decrypted and was returned unchanged,
    /// on the assumption it was written before encryption was enabled.
    LegacyPassthrough(Vec<u8>),
}

impl Decrypted {
    /// The bytes, whichever way they were obtained.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Decrypted::Plaintext(b) | Decrypted::LegacyPassthrough(b) => b,
        }
    }

    /// Whether this came from the legacy fallback.
    pub fn is_legacy(&self) -> bool {
        matches!(self, Decrypted::LegacyPassthrough(_))
    }
}

/// Encrypts and decrypts stored content under a resource key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentCipher {
    legacy_plaintext_fallback: bool,
}

impl ContentCipher {
    /// Create a cipher. With `legacy_plaintext_fallback` on, undecryptable
    /// values are passed through instead of failing.
    pub fn new(legacy_plaintext_fallback: bool) -> Self {
        Self {
            legacy_plaintext_fallback,
        }
    }

    /// Encrypt a value. Empty values stay empty.
    pub fn encrypt(&self, plaintext: &[u8], key: &ResourceKey) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Ok(Vec::new());
        }
        EncryptedContent::seal(plaintext, key)?.to_bytes()
    }

    /// Decrypt a value. Empty values stay empty.
    pub fn decrypt(&self, stored: &[u8], key: &ResourceKey) -> Result<Decrypted> {
        if stored.is_empty() {
            return Ok(Decrypted::Plaintext(Vec::new()));
        }

        let result = EncryptedContent::from_bytes(stored).and_then(|envelope| envelope.open(key));
        match result {
            Ok(plaintext) => Ok(Decrypted::Plaintext(plaintext)),
            Err(e) if self.legacy_plaintext_fallback => {
                warn!(len = stored.len(), error = %e, "content did not decrypt, passing through as legacy plaintext");
                Ok(Decrypted::LegacyPassthrough(stored.to_vec()))
            }
            Err(e) => {
                debug!(error = %e, "content did not decrypt");
                Err(CryptoError::DecryptionFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_roundtrip() {
        let key = ResourceKey::generate();
        let cipher = ContentCipher::default();

        let stored = cipher.encrypt(b"=SUM(A1:A3)", &key).unwrap();
        assert_ne!(stored, b"=SUM(A1:A3)");

        let decrypted = cipher.decrypt(&stored, &key).unwrap();
        assert_eq!(decrypted, Decrypted::Plaintext(b"=SUM(A1:A3)".to_vec()));
    }

    #[test]
    fn test_empty_passes_through() {
        let key = ResourceKey::generate();
        let cipher = ContentCipher::default();
        assert!(cipher.encrypt(b"", &key).unwrap().is_empty());
        assert_eq!(
            cipher.decrypt(b"", &key).unwrap(),
            Decrypted::Plaintext(Vec::new())
        );
    }

    #[test]
    fn test_wrong_key_fails_without_fallback() {
        let cipher = ContentCipher::default();
        let stored = cipher.encrypt(b"secret", &ResourceKey::generate()).unwrap();

        let result = cipher.decrypt(&stored, &ResourceKey::generate());
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_legacy_fallback_returns_input() {
        let key = ResourceKey::generate();
        let cipher = ContentCipher::new(true);

        let decrypted = cipher.decrypt(b"plain old value", &key).unwrap();
        assert!(decrypted.is_legacy());
        assert_eq!(decrypted.into_bytes(), b"plain old value");

        let stored = cipher.encrypt(b"new value", &key).unwrap();
        assert!(!cipher.decrypt(&stored, &key).unwrap().is_legacy());
    }

    #[test]
    fn test_envelope_serialization() {
        let key = ResourceKey::generate();
        let envelope = EncryptedContent::seal(b"test", &key).unwrap();

        let bytes = envelope.to_bytes().unwrap();
        let recovered = EncryptedContent::from_bytes(&bytes).unwrap();
        assert_eq!(envelope, recovered);
        assert_eq!(recovered.open(&key).unwrap(), b"test");
    }
}
