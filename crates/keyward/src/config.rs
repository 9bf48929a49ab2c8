//! Engine configuration.

use serde::Deserialize;

use keyward_perms::KdfParams;

use crate::error::{Error, Result};

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Argon2id cost for PIN escrow and PIN hashing.
    pub kdf: KdfParams,
    /// Return undecryptable content unchanged instead of failing.
    pub legacy_plaintext_fallback: bool,
    /// Largest member list accepted by one add, create or re-key call.
    pub max_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            legacy_plaintext_fallback: false,
            max_batch_size: 1000,
        }
    }
}

impl EngineConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidInput(format!("config: {e}")))?;
        if config.max_batch_size == 0 {
            return Err(Error::InvalidInput(
                "config: max_batch_size must be positive".into(),
            ));
        }
        Ok(config)
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_legacy_plaintext_fallback(mut self, enabled: bool) -> Self {
        self.legacy_plaintext_fallback = enabled;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }
}
