//! User key material: public key registration and PIN escrow.

use std::sync::Arc;

use tracing::{info, warn};
use zeroize::Zeroizing;

use keyward_core::UserId;
use keyward_perms::{generate_keypair, CryptoError, PinEscrowService, PrivateKey, PublicKey};
use keyward_store::{Store, StoreError, UserKeyRecord};

use crate::engine::offload;
use crate::error::{Error, Result};

/// A key pair generated on the server, handed back exactly once.
#[derive(Debug)]
pub struct ProvisionedKeys {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Registers public keys and escrows private keys under a PIN.
pub struct KeyEscrow<S: Store> {
    store: Arc<S>,
    escrow: PinEscrowService,
}

impl<S: Store> KeyEscrow<S> {
    pub fn new(store: Arc<S>, escrow: PinEscrowService) -> Self {
        Self { store, escrow }
    }

    /// Register a public key without escrow.
    pub async fn register_public_key(&self, user: &UserId, public_key: &PublicKey) -> Result<()> {
        self.store
            .save_user_public_key(user, public_key)
            .await
            .map_err(key_conflict_is_input)?;
        info!(user = %user, "registered public key");
        Ok(())
    }

    /// A user's registered public key.
    pub async fn public_key(&self, user: &UserId) -> Result<PublicKey> {
        self.store
            .load_user_public_key(user)
            .await?
            .ok_or_else(|| Error::NotFound(format!("public key for {}", user)))
    }

    /// Escrow a key pair generated on the user's device.
    ///
    /// The private key must match the public key. Public key, escrow and PIN
    /// hash are stored together.
    pub async fn setup_key_escrow(
        &self,
        user: &UserId,
        public_key: &PublicKey,
        private_key: &[u8],
        pin: &str,
    ) -> Result<()> {
        if pin.is_empty() {
            return Err(Error::InvalidInput("PIN must not be empty".into()));
        }
        let private = PrivateKey::from_slice(private_key)
            .map_err(|_| Error::InvalidInput("private key must be 32 bytes".into()))?;
        if private.public_key() != *public_key {
            return Err(Error::InvalidInput(
                "private key does not match public key".into(),
            ));
        }
        if let Some(existing) = self.store.load_user_public_key(user).await? {
            if existing != *public_key {
                return Err(replaced_key(user));
            }
        }

        self.escrow_and_save(user, private, pin).await
    }

    /// Generate a key pair on the server, escrow it, and return it.
    ///
    /// Only for users without a key: a new pair would orphan every wrapped
    /// key the user already holds.
    pub async fn provision_user_keys(&self, user: &UserId, pin: &str) -> Result<ProvisionedKeys> {
        if pin.is_empty() {
            return Err(Error::InvalidInput("PIN must not be empty".into()));
        }
        if self.store.load_user_public_key(user).await?.is_some() {
            return Err(replaced_key(user));
        }
        let (private_key, public_key) = offload(|| Ok(generate_keypair())).await?;
        let returned = PrivateKey::from_bytes(*private_key.to_bytes());

        self.escrow_and_save(user, private_key, pin).await?;
        Ok(ProvisionedKeys {
            public_key,
            private_key: returned,
        })
    }

    /// Recover the escrowed private key.
    ///
    /// The PIN is checked against its hash before the escrow is touched.
    /// A wrong PIN fails with `PinInvalid` and reveals nothing else.
    pub async fn recover_private_key(&self, user: &UserId, pin: &str) -> Result<PrivateKey> {
        let not_escrowed = || Error::NotFound(format!("no escrowed key for {}", user));
        let pin_hash = self
            .store
            .load_pin_hash(user)
            .await?
            .ok_or_else(not_escrowed)?;
        let escrowed = self
            .store
            .load_escrowed_private_key(user)
            .await?
            .ok_or_else(not_escrowed)?;

        let escrow = self.escrow.clone();
        let pin = Zeroizing::new(pin.to_owned());
        let recovered = offload(move || {
            if !escrow.verify_pin(&pin, &pin_hash) {
                return Err(CryptoError::PinInvalid.into());
            }
            let bytes = escrow.recover_private_key(&escrowed.ciphertext, &pin, &escrowed.salt)?;
            Ok(PrivateKey::from_slice(&bytes)?)
        })
        .await;

        match recovered {
            Err(Error::Crypto(CryptoError::PinInvalid)) => {
                warn!(user = %user, "PIN recovery denied");
                Err(CryptoError::PinInvalid.into())
            }
            other => other,
        }
    }

    /// Re-escrow the same private key under a new PIN.
    pub async fn change_pin(&self, user: &UserId, old_pin: &str, new_pin: &str) -> Result<()> {
        if new_pin.is_empty() {
            return Err(Error::InvalidInput("PIN must not be empty".into()));
        }
        let private_key = self.recover_private_key(user, old_pin).await?;
        self.escrow_and_save(user, private_key, new_pin).await?;
        info!(user = %user, "changed PIN");
        Ok(())
    }

    async fn escrow_and_save(&self, user: &UserId, private_key: PrivateKey, pin: &str) -> Result<()> {
        let escrow = self.escrow.clone();
        let pin = Zeroizing::new(pin.to_owned());
        let record = offload(move || {
            let escrowed = escrow.escrow_private_key(&*private_key.to_bytes(), &pin)?;
            let pin_hash = escrow.hash_pin(&pin)?;
            Ok(UserKeyRecord {
                public_key: private_key.public_key(),
                escrow: escrowed,
                pin_hash,
            })
        })
        .await?;

        self.store
            .save_escrowed_private_key(user, &record)
            .await
            .map_err(key_conflict_is_input)?;
        info!(user = %user, "escrowed private key");
        Ok(())
    }
}

fn replaced_key(user: &UserId) -> Error {
    Error::InvalidInput(format!(
        "{} already has a public key; escrow must use the same key pair",
        user
    ))
}

fn key_conflict_is_input(e: StoreError) -> Error {
    match e {
        StoreError::KeyConflict(msg) => Error::InvalidInput(msg),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_perms::{unwrap_resource_key, KdfParams, ResourceKey};
    use keyward_store::MemoryStore;

    fn escrow() -> (KeyEscrow<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let keys = KeyEscrow::new(store.clone(), PinEscrowService::new(KdfParams::light()));
        (keys, store)
    }

    #[tokio::test]
    async fn test_setup_and_recover() {
        let (keys, _) = escrow();
        let user = UserId::generate();
        let (private_key, public_key) = generate_keypair();

        keys.setup_key_escrow(&user, &public_key, &*private_key.to_bytes(), "4821")
            .await
            .unwrap();
        assert_eq!(keys.public_key(&user).await.unwrap(), public_key);

        let recovered = keys.recover_private_key(&user, "4821").await.unwrap();
        assert_eq!(*recovered.to_bytes(), *private_key.to_bytes());
    }

    #[tokio::test]
    async fn test_wrong_pin() {
        let (keys, _) = escrow();
        let user = UserId::generate();
        keys.provision_user_keys(&user, "1234").await.unwrap();

        let err = keys.recover_private_key(&user, "4321").await.unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::PinInvalid)));
        assert_eq!(err.public_message(), "cannot decrypt: wrong key or PIN");
    }

    #[tokio::test]
    async fn test_mismatched_pair_rejected() {
        let (keys, _) = escrow();
        let user = UserId::generate();
        let (private_key, _) = generate_keypair();
        let (_, other_public) = generate_keypair();

        let err = keys
            .setup_key_escrow(&user, &other_public, &*private_key.to_bytes(), "1234")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = keys
            .setup_key_escrow(&user, &other_public, &[1, 2, 3], "1234")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_pin_rejected() {
        let (keys, _) = escrow();
        let err = keys
            .provision_user_keys(&UserId::generate(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_provisioned_keys_match_stored() {
        let (keys, store) = escrow();
        let user = UserId::generate();
        let provisioned = keys.provision_user_keys(&user, "0000").await.unwrap();

        assert_eq!(provisioned.private_key.public_key(), provisioned.public_key);
        assert_eq!(
            store.load_user_public_key(&user).await.unwrap(),
            Some(provisioned.public_key)
        );

        let recovered = keys.recover_private_key(&user, "0000").await.unwrap();
        assert_eq!(recovered.public_key(), provisioned.public_key);
    }

    #[tokio::test]
    async fn test_recover_without_escrow() {
        let (keys, _) = escrow();
        let user = UserId::generate();
        let (_, public_key) = generate_keypair();
        keys.register_public_key(&user, &public_key).await.unwrap();

        let err = keys.recover_private_key(&user, "1234").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reprovision_keeps_existing_key() {
        let (keys, _) = escrow();
        let user = UserId::generate();
        let first = keys.provision_user_keys(&user, "1111").await.unwrap();
        let wrapped = ResourceKey::generate().wrap_for(&first.public_key).unwrap();

        let err = keys.provision_user_keys(&user, "2222").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(keys.public_key(&user).await.unwrap(), first.public_key);

        let recovered = keys.recover_private_key(&user, "1111").await.unwrap();
        assert!(unwrap_resource_key(&wrapped, &recovered).is_ok());
        let err = keys.recover_private_key(&user, "2222").await.unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::PinInvalid)));
    }

    #[tokio::test]
    async fn test_escrow_of_other_pair_rejected() {
        let (keys, store) = escrow();
        let user = UserId::generate();
        let (_, public_key) = generate_keypair();
        keys.register_public_key(&user, &public_key).await.unwrap();

        let (other_private, other_public) = generate_keypair();
        let err = keys
            .setup_key_escrow(&user, &other_public, &*other_private.to_bytes(), "1234")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(keys.public_key(&user).await.unwrap(), public_key);
        assert!(store.load_pin_hash(&user).await.unwrap().is_none());

        let err = keys
            .register_public_key(&user, &other_public)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_same_pair_escrow_replaces_pin() {
        let (keys, _) = escrow();
        let user = UserId::generate();
        let (private_key, public_key) = generate_keypair();
        keys.register_public_key(&user, &public_key).await.unwrap();

        keys.setup_key_escrow(&user, &public_key, &*private_key.to_bytes(), "1111")
            .await
            .unwrap();
        keys.setup_key_escrow(&user, &public_key, &*private_key.to_bytes(), "9999")
            .await
            .unwrap();

        let recovered = keys.recover_private_key(&user, "9999").await.unwrap();
        assert_eq!(recovered.public_key(), public_key);
        let err = keys.recover_private_key(&user, "1111").await.unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::PinInvalid)));
    }

    #[tokio::test]
    async fn test_change_pin() {
        let (keys, _) = escrow();
        let user = UserId::generate();
        let provisioned = keys.provision_user_keys(&user, "1111").await.unwrap();

        let err = keys.change_pin(&user, "0000", "2222").await.unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::PinInvalid)));

        keys.change_pin(&user, "1111", "2222").await.unwrap();
        let recovered = keys.recover_private_key(&user, "2222").await.unwrap();
        assert_eq!(recovered.public_key(), provisioned.public_key);
        assert!(keys.recover_private_key(&user, "1111").await.is_err());
    }

    #[tokio::test]
    async fn test_pin_hash_checked_before_escrow() {
        let (keys, store) = escrow();
        let user = UserId::generate();
        let (private_key, public_key) = generate_keypair();

        // Escrow opens under 1111, but the stored hash is for 2222.
        let service = PinEscrowService::new(KdfParams::light());
        let record = UserKeyRecord {
            public_key,
            escrow: service
                .escrow_private_key(&*private_key.to_bytes(), "1111")
                .unwrap(),
            pin_hash: service.hash_pin("2222").unwrap(),
        };
        store.save_escrowed_private_key(&user, &record).await.unwrap();

        let err = keys.recover_private_key(&user, "1111").await.unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::PinInvalid)));
    }
}
