//! # Keyward Permissions
//!
//! Key wrapping, PIN escrow, resource keys and the role policy.
//!
//! ## Key Model
//!
//! Each user holds an X25519 key pair. Each resource has one symmetric key,
//! wrapped separately for every member's public key:
//!
//! 1. **Resource Key**: 256-bit key that encrypts the resource's content
//! 2. **Wrapped Keys**: the resource key sealed for each member
//! 3. **Escrow**: the user's private key, encrypted under a PIN-derived key
//!
//! The server stores only wrapped keys and escrow ciphertext. It never
//! persists a plaintext resource key, private key or PIN.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyward_perms::{crypto, generate_keypair, unwrap_resource_key, ResourceKeyService};
//!
//! let (private_key, public_key) = generate_keypair();
//! let wrapped = ResourceKeyService::new()
//!     .issue_initial_membership(&public_key)
//!     .unwrap();
//! let key = unwrap_resource_key(&wrapped, &private_key).unwrap();
//! # let _ = (key, crypto::MAX_WRAP_PAYLOAD);
//! ```

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod escrow;
pub mod policy;
pub mod resource_key;

pub use crypto::{generate_keypair, PrivateKey, PublicKey, MAX_WRAP_PAYLOAD};
pub use envelope::{ContentCipher, Decrypted, EncryptedContent, EncryptionFormat};
pub use error::{CryptoError, Result};
pub use escrow::{EscrowedKey, KdfParams, PinEscrowService, PinHash, SALT_LEN};
pub use policy::{can_grant, permits, Action};
pub use resource_key::{unwrap_resource_key, IssuedKey, ResourceKey, ResourceKeyService};
