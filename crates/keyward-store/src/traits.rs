//! Store trait: the abstract interface for membership persistence.
//!
//! The engine is storage-agnostic. Implementations include SQLite
//! (primary) and in-memory (for tests).

use async_trait::async_trait;
use keyward_core::{Membership, Resource, ResourceFilter, ResourceId, UserId, WrappedKey};
use keyward_perms::{EscrowedKey, PinHash, PublicKey};

use crate::error::{Result, StoreError};

/// Result of inserting a membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Row was inserted.
    Inserted,
    /// A row for this (user, resource) already exists (not an error).
    AlreadyExists,
}

/// Everything persisted for a user's key material, written in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserKeyRecord {
    pub public_key: PublicKey,
    pub escrow: EscrowedKey,
    pub pin_hash: PinHash,
}

/// The Store trait: async interface for resources, memberships and user keys.
///
/// # Design Notes
///
/// - **Atomic bulk writes**: every method taking a slice commits all rows
///   or none.
/// - **Cascade**: deleting a resource deletes its memberships.
/// - **Idempotent inserts**: `insert_memberships` reports existing rows as
///   `AlreadyExists` and leaves them untouched.
/// - **No empty keys**: a membership with an empty wrapped key is rejected
///   with `InvalidData`.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Resources
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a resource together with its initial memberships.
    async fn insert_resource(&self, resource: &Resource, members: &[Membership]) -> Result<()>;

    /// Get a resource by id.
    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>>;

    /// Delete a resource and all of its memberships.
    ///
    /// Returns `false` if the resource did not exist.
    async fn delete_resource(&self, id: &ResourceId) -> Result<bool>;

    /// List the resources `user` is a member of, with their membership.
    ///
    /// Ordered by last access (most recent first, never-accessed last),
    /// then by creation time, newest first. `filter.page` slices the
    /// ordered result.
    async fn list_resources_for_user(
        &self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<(Resource, Membership)>>;

    /// The direct room `a` and `b` both belong to, oldest first if there
    /// are several.
    async fn find_direct_room(&self, a: &UserId, b: &UserId) -> Result<Option<Resource>>;

    /// The newest resource with this link that `user` is a member of.
    async fn find_resource_by_link(
        &self,
        user: &UserId,
        link: &str,
    ) -> Result<Option<(Resource, Membership)>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Memberships
    // ─────────────────────────────────────────────────────────────────────────

    /// Load one membership.
    async fn load_membership(
        &self,
        user: &UserId,
        resource: &ResourceId,
    ) -> Result<Option<Membership>>;

    /// Insert or replace one membership.
    async fn save_membership(&self, membership: &Membership) -> Result<()>;

    /// Insert or replace several memberships atomically.
    async fn save_memberships(&self, memberships: &[Membership]) -> Result<()>;

    /// Delete one membership. Returns `false` if it did not exist.
    async fn delete_membership(&self, user: &UserId, resource: &ResourceId) -> Result<bool>;

    /// All memberships of a resource.
    async fn list_members(&self, resource: &ResourceId) -> Result<Vec<Membership>>;

    /// Number of members of a resource.
    async fn count_members(&self, resource: &ResourceId) -> Result<usize>;

    /// Insert memberships atomically, skipping rows that already exist.
    ///
    /// Returns one result per input row, in order.
    async fn insert_memberships(&self, memberships: &[Membership]) -> Result<Vec<InsertResult>>;

    /// Delete the given users' memberships of a resource atomically.
    ///
    /// Returns how many rows were deleted.
    async fn delete_memberships(&self, resource: &ResourceId, users: &[UserId]) -> Result<usize>;

    /// Replace wrapped keys for existing members atomically.
    ///
    /// Fails with `NotFound` (writing nothing) if any user is not a member.
    async fn replace_wrapped_keys(
        &self,
        resource: &ResourceId,
        keys: &[(UserId, WrappedKey)],
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // User keys
    // ─────────────────────────────────────────────────────────────────────────

    /// A user's public key, if registered.
    async fn load_user_public_key(&self, user: &UserId) -> Result<Option<PublicKey>>;

    /// Register a public key without escrow (client-held private key).
    ///
    /// Registering the same key again is a no-op. `KeyConflict` if the
    /// user already has a different key.
    async fn save_user_public_key(&self, user: &UserId, public_key: &PublicKey) -> Result<()>;

    /// A user's escrowed private key, if escrow was set up.
    async fn load_escrowed_private_key(&self, user: &UserId) -> Result<Option<EscrowedKey>>;

    /// A user's PIN hash, if escrow was set up.
    async fn load_pin_hash(&self, user: &UserId) -> Result<Option<PinHash>>;

    /// Store public key, escrow ciphertext and PIN hash in one write.
    ///
    /// Re-escrowing the same public key replaces escrow and PIN hash.
    /// `KeyConflict` if the user already has a different public key.
    async fn save_escrowed_private_key(&self, user: &UserId, record: &UserKeyRecord)
        -> Result<()>;
}

/// Reject rows that would break the non-empty wrapped key invariant.
pub(crate) fn check_wrapped_keys<'a>(keys: impl IntoIterator<Item = &'a WrappedKey>) -> Result<()> {
    if keys.into_iter().any(WrappedKey::is_empty) {
        return Err(StoreError::InvalidData("wrapped key must not be empty".into()));
    }
    Ok(())
}
