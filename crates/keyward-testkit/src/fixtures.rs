//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Once;

use keyward::{Engine, EngineConfig};
use keyward_core::{UserId, WrappedKey};
use keyward_perms::{unwrap_resource_key, KdfParams, PrivateKey, PublicKey, ResourceKey};
use keyward_store::{MemoryStore, Store};
use tracing_subscriber::EnvFilter;

/// A user with an id and a key pair.
pub struct TestUser {
    pub id: UserId,
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl TestUser {
    /// Create a user with random id and keys.
    pub fn new() -> Self {
        let private_key = PrivateKey::generate();
        Self {
            id: UserId::generate(),
            public_key: private_key.public_key(),
            private_key,
        }
    }

    /// Create with a deterministic id and key pair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        let mut id = [0u8; 16];
        id.copy_from_slice(&seed[..16]);
        let private_key = PrivateKey::from_bytes(seed);
        Self {
            id: UserId::from_bytes(id),
            public_key: private_key.public_key(),
            private_key,
        }
    }

    /// Wrap a resource key for this user, as an inviting client would.
    pub fn wrap_for(&self, key: &ResourceKey) -> WrappedKey {
        key.wrap_for(&self.public_key).expect("wrap resource key")
    }

    /// Unwrap this user's copy of a resource key.
    pub fn unwrap(&self, wrapped: &WrappedKey) -> ResourceKey {
        unwrap_resource_key(wrapped, &self.private_key).expect("unwrap resource key")
    }

    /// Register this user's public key with the engine.
    pub async fn enroll<S: Store>(&self, engine: &Engine<S>) {
        engine
            .keys()
            .register_public_key(&self.id, &self.public_key)
            .await
            .expect("register public key");
    }
}

impl Default for TestUser {
    fn default() -> Self {
        Self::new()
    }
}

/// Create multiple users with distinct deterministic keys.
pub fn test_users(count: usize) -> Vec<TestUser> {
    (0..count)
        .map(|i| {
            // Byte 0 is clamped away by X25519, so vary byte 1.
            let mut seed = [0x5au8; 32];
            seed[1] = i as u8;
            TestUser::with_seed(seed)
        })
        .collect()
}

/// Engine config with a cheap KDF, so escrow tests stay fast.
pub fn test_config() -> EngineConfig {
    EngineConfig::default().with_kdf(KdfParams::light())
}

/// An engine over a fresh in-memory store.
pub fn engine_with_memory_store() -> Engine<MemoryStore> {
    Engine::new(MemoryStore::new(), test_config())
}

/// Install a `fmt` subscriber once per process. Filter with `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
