//! The Keyward engine: one store, one lock table, every component.

use std::sync::Arc;

use tracing::debug;

use keyward_core::{ResourceId, UserId};
use keyward_perms::{
    unwrap_resource_key, Action, ContentCipher, Decrypted, PinEscrowService, PrivateKey,
};
use keyward_store::Store;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::keys::KeyEscrow;
use crate::lifecycle::ResourceLifecycle;
use crate::locks::ResourceLocks;
use crate::registry::{authorize, MembershipRegistry};

/// The main engine.
///
/// Owns the store handle and the per-resource lock table. Components share
/// both, so a mutation through any of them is serialized against the rest.
pub struct Engine<S: Store> {
    store: Arc<S>,
    config: EngineConfig,
    registry: MembershipRegistry<S>,
    lifecycle: ResourceLifecycle<S>,
    keys: KeyEscrow<S>,
    content: ContentCipher,
}

impl<S: Store> Engine<S> {
    /// Create an engine over a store.
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self::from_arc(Arc::new(store), config)
    }

    /// Create an engine over a store that is shared elsewhere.
    pub fn from_arc(store: Arc<S>, config: EngineConfig) -> Self {
        let locks = Arc::new(ResourceLocks::new());
        Self {
            registry: MembershipRegistry::new(store.clone(), locks.clone(), config.max_batch_size),
            lifecycle: ResourceLifecycle::new(store.clone(), locks, config.max_batch_size),
            keys: KeyEscrow::new(store.clone(), PinEscrowService::new(config.kdf)),
            content: ContentCipher::new(config.legacy_plaintext_fallback),
            store,
            config,
        }
    }

    /// Membership changes and queries.
    pub fn registry(&self) -> &MembershipRegistry<S> {
        &self.registry
    }

    /// Resource creation, deletion and key rotation.
    pub fn lifecycle(&self) -> &ResourceLifecycle<S> {
        &self.lifecycle
    }

    /// Public keys and PIN escrow.
    pub fn keys(&self) -> &KeyEscrow<S> {
        &self.keys
    }

    pub fn content_cipher(&self) -> &ContentCipher {
        &self.content
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Content
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt content for a resource the user may write to.
    ///
    /// `private_key` is the caller's own key, used to unwrap their copy of
    /// the resource key. It is never stored.
    pub async fn encrypt_content(
        &self,
        user: &UserId,
        resource: &ResourceId,
        private_key: &PrivateKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let row = authorize(&*self.store, user, resource, Action::MutateContent).await?;
        let key = unwrap_resource_key(&row.wrapped_key, private_key)?;
        Ok(self.content.encrypt(plaintext, &key)?)
    }

    /// Decrypt content for a resource the user belongs to.
    pub async fn decrypt_content(
        &self,
        user: &UserId,
        resource: &ResourceId,
        private_key: &PrivateKey,
        stored: &[u8],
    ) -> Result<Decrypted> {
        let row = authorize(&*self.store, user, resource, Action::Decrypt).await?;
        let key = unwrap_resource_key(&row.wrapped_key, private_key)?;
        let decrypted = self.content.decrypt(stored, &key)?;
        if decrypted.is_legacy() {
            debug!(resource = %resource, user = %user, "served legacy plaintext");
        }
        Ok(decrypted)
    }
}

/// Run CPU-bound work on the blocking pool.
pub(crate) async fn offload<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::ResourceKind;
    use keyward_perms::{CryptoError, KdfParams};
    use keyward_store::MemoryStore;

    fn engine(legacy: bool) -> Engine<MemoryStore> {
        let config = EngineConfig::default()
            .with_kdf(KdfParams::light())
            .with_legacy_plaintext_fallback(legacy);
        Engine::new(MemoryStore::new(), config)
    }

    #[tokio::test]
    async fn test_content_roundtrip_between_members() {
        let engine = engine(false);
        let alice = UserId::generate();
        let bob = UserId::generate();
        let alice_keys = engine.keys().provision_user_keys(&alice, "1111").await.unwrap();
        let bob_keys = engine.keys().provision_user_keys(&bob, "2222").await.unwrap();

        let rid = engine
            .lifecycle()
            .create_resource(&alice, ResourceKind::Sheet, &[bob])
            .await
            .unwrap()
            .resource
            .id;

        let stored = engine
            .encrypt_content(&alice, &rid, &alice_keys.private_key, b"cell A1")
            .await
            .unwrap();
        let decrypted = engine
            .decrypt_content(&bob, &rid, &bob_keys.private_key, &stored)
            .await
            .unwrap();
        assert_eq!(decrypted, Decrypted::Plaintext(b"cell A1".to_vec()));

        // Bob is a viewer and may not write.
        let err = engine
            .encrypt_content(&bob, &rid, &bob_keys.private_key, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_legacy_fallback_is_opt_in() {
        for legacy in [false, true] {
            let engine = engine(legacy);
            let alice = UserId::generate();
            let keys = engine.keys().provision_user_keys(&alice, "1111").await.unwrap();
            let rid = engine
                .lifecycle()
                .create_resource(&alice, ResourceKind::Sheet, &[])
                .await
                .unwrap()
                .resource
                .id;

            let result = engine
                .decrypt_content(&alice, &rid, &keys.private_key, b"plain old text")
                .await;
            if legacy {
                assert_eq!(
                    result.unwrap(),
                    Decrypted::LegacyPassthrough(b"plain old text".to_vec())
                );
            } else {
                assert!(matches!(
                    result,
                    Err(Error::Crypto(CryptoError::DecryptionFailed))
                ));
            }
        }
    }

    #[tokio::test]
    async fn test_components_share_locks_and_store() {
        let engine = engine(false);
        let alice = UserId::generate();
        engine.keys().provision_user_keys(&alice, "1111").await.unwrap();
        let rid = engine
            .lifecycle()
            .create_resource(&alice, ResourceKind::GroupRoom, &[])
            .await
            .unwrap()
            .resource
            .id;

        assert_eq!(
            engine.registry().get_role(&alice, &rid).await.unwrap(),
            Some(keyward_core::Role::Owner)
        );
        assert_eq!(engine.config().max_batch_size, 1000);
    }
}
