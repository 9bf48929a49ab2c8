//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use keyward_core::{
    Membership, Resource, ResourceFilter, ResourceId, ResourceKind, UserId, WrappedKey,
};
use keyward_perms::{EscrowedKey, PinHash, PublicKey};

use crate::error::{Result, StoreError};
use crate::traits::{check_wrapped_keys, InsertResult, Store, UserKeyRecord};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    resources: HashMap<ResourceId, Resource>,

    /// Keyed by (resource, user) so a resource's members are contiguous.
    memberships: BTreeMap<(ResourceId, UserId), Membership>,

    users: HashMap<UserId, StoredUser>,
}

struct StoredUser {
    public_key: PublicKey,
    escrow: Option<(EscrowedKey, PinHash)>,
}

impl MemoryStoreInner {
    fn ensure_resource(&self, id: &ResourceId) -> Result<()> {
        if self.resources.contains_key(id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("resource {}", id)))
        }
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_resource(&self, resource: &Resource, members: &[Membership]) -> Result<()> {
        check_wrapped_keys(members.iter().map(|m| &m.wrapped_key))?;
        if members.iter().any(|m| m.resource_id != resource.id) {
            return Err(StoreError::InvalidData(
                "initial member belongs to another resource".into(),
            ));
        }
        let unique: HashSet<UserId> = members.iter().map(|m| m.user_id).collect();
        if unique.len() != members.len() {
            return Err(StoreError::InvalidData("duplicate initial member".into()));
        }

        let mut inner = self.write()?;
        if inner.resources.contains_key(&resource.id) {
            return Err(StoreError::InvalidData(format!(
                "resource {} already exists",
                resource.id
            )));
        }

        inner.resources.insert(resource.id, resource.clone());
        for m in members {
            inner
                .memberships
                .insert((m.resource_id, m.user_id), m.clone());
        }
        Ok(())
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        Ok(self.read()?.resources.get(id).cloned())
    }

    async fn delete_resource(&self, id: &ResourceId) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.resources.remove(id).is_none() {
            return Ok(false);
        }
        inner.memberships.retain(|(rid, _), _| rid != id);
        Ok(true)
    }

    async fn list_resources_for_user(
        &self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<(Resource, Membership)>> {
        let inner = self.read()?;

        let mut rows: Vec<(Resource, Membership)> = inner
            .memberships
            .values()
            .filter(|m| m.user_id == *user)
            .filter_map(|m| {
                let resource = inner.resources.get(&m.resource_id)?;
                filter
                    .matches(resource, m)
                    .then(|| (resource.clone(), m.clone()))
            })
            .collect();

        rows.sort_by(|(ra, ma), (rb, mb)| {
            mb.last_accessed_at
                .cmp(&ma.last_accessed_at)
                .then(rb.created_at.cmp(&ra.created_at))
                .then(ra.id.cmp(&rb.id))
        });
        if let Some(page) = filter.page {
            rows = rows
                .into_iter()
                .skip(page.offset())
                .take(page.page_size)
                .collect();
        }
        Ok(rows)
    }

    async fn find_direct_room(&self, a: &UserId, b: &UserId) -> Result<Option<Resource>> {
        let inner = self.read()?;
        Ok(inner
            .resources
            .values()
            .filter(|r| r.kind == ResourceKind::DirectRoom)
            .filter(|r| {
                inner.memberships.contains_key(&(r.id, *a))
                    && inner.memberships.contains_key(&(r.id, *b))
            })
            .min_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn find_resource_by_link(
        &self,
        user: &UserId,
        link: &str,
    ) -> Result<Option<(Resource, Membership)>> {
        let inner = self.read()?;
        Ok(inner
            .memberships
            .values()
            .filter(|m| m.user_id == *user)
            .filter_map(|m| {
                let resource = inner.resources.get(&m.resource_id)?;
                (resource.link.as_deref() == Some(link)).then_some((resource, m))
            })
            .max_by_key(|(r, _)| (r.created_at, std::cmp::Reverse(r.id)))
            .map(|(r, m)| (r.clone(), m.clone())))
    }

    async fn load_membership(
        &self,
        user: &UserId,
        resource: &ResourceId,
    ) -> Result<Option<Membership>> {
        Ok(self.read()?.memberships.get(&(*resource, *user)).cloned())
    }

    async fn save_membership(&self, membership: &Membership) -> Result<()> {
        self.save_memberships(std::slice::from_ref(membership)).await
    }

    async fn save_memberships(&self, memberships: &[Membership]) -> Result<()> {
        check_wrapped_keys(memberships.iter().map(|m| &m.wrapped_key))?;

        let mut inner = self.write()?;
        for m in memberships {
            inner.ensure_resource(&m.resource_id)?;
        }
        for m in memberships {
            inner
                .memberships
                .insert((m.resource_id, m.user_id), m.clone());
        }
        Ok(())
    }

    async fn delete_membership(&self, user: &UserId, resource: &ResourceId) -> Result<bool> {
        Ok(self
            .write()?
            .memberships
            .remove(&(*resource, *user))
            .is_some())
    }

    async fn list_members(&self, resource: &ResourceId) -> Result<Vec<Membership>> {
        let inner = self.read()?;
        Ok(inner
            .memberships
            .range((*resource, UserId::from_bytes([0; 16]))..)
            .take_while(|((rid, _), _)| rid == resource)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn count_members(&self, resource: &ResourceId) -> Result<usize> {
        let inner = self.read()?;
        Ok(inner
            .memberships
            .keys()
            .filter(|(rid, _)| rid == resource)
            .count())
    }

    async fn insert_memberships(&self, memberships: &[Membership]) -> Result<Vec<InsertResult>> {
        check_wrapped_keys(memberships.iter().map(|m| &m.wrapped_key))?;

        let mut inner = self.write()?;
        for m in memberships {
            inner.ensure_resource(&m.resource_id)?;
        }

        let mut results = Vec::with_capacity(memberships.len());
        for m in memberships {
            let key = (m.resource_id, m.user_id);
            if inner.memberships.contains_key(&key) {
                results.push(InsertResult::AlreadyExists);
            } else {
                inner.memberships.insert(key, m.clone());
                results.push(InsertResult::Inserted);
            }
        }
        Ok(results)
    }

    async fn delete_memberships(&self, resource: &ResourceId, users: &[UserId]) -> Result<usize> {
        let mut inner = self.write()?;
        Ok(users
            .iter()
            .filter(|user| inner.memberships.remove(&(*resource, **user)).is_some())
            .count())
    }

    async fn replace_wrapped_keys(
        &self,
        resource: &ResourceId,
        keys: &[(UserId, WrappedKey)],
    ) -> Result<()> {
        check_wrapped_keys(keys.iter().map(|(_, k)| k))?;

        let mut inner = self.write()?;
        if let Some((user, _)) = keys
            .iter()
            .find(|(user, _)| !inner.memberships.contains_key(&(*resource, *user)))
        {
            return Err(StoreError::NotFound(format!(
                "user {} is not a member of {}",
                user, resource
            )));
        }

        for (user, key) in keys {
            if let Some(m) = inner.memberships.get_mut(&(*resource, *user)) {
                m.wrapped_key = key.clone();
            }
        }
        Ok(())
    }

    async fn load_user_public_key(&self, user: &UserId) -> Result<Option<PublicKey>> {
        Ok(self.read()?.users.get(user).map(|u| u.public_key))
    }

    async fn save_user_public_key(&self, user: &UserId, public_key: &PublicKey) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.users.get(user) {
            if existing.public_key != *public_key {
                return Err(StoreError::KeyConflict(format!(
                    "user {} already has a different public key",
                    user
                )));
            }
            return Ok(());
        }
        inner.users.insert(
            *user,
            StoredUser {
                public_key: *public_key,
                escrow: None,
            },
        );
        Ok(())
    }

    async fn load_escrowed_private_key(&self, user: &UserId) -> Result<Option<EscrowedKey>> {
        Ok(self
            .read()?
            .users
            .get(user)
            .and_then(|u| u.escrow.as_ref())
            .map(|(escrow, _)| escrow.clone()))
    }

    async fn load_pin_hash(&self, user: &UserId) -> Result<Option<PinHash>> {
        Ok(self
            .read()?
            .users
            .get(user)
            .and_then(|u| u.escrow.as_ref())
            .map(|(_, hash)| hash.clone()))
    }

    async fn save_escrowed_private_key(
        &self,
        user: &UserId,
        record: &UserKeyRecord,
    ) -> Result<()> {
        if record.escrow.ciphertext.is_empty() {
            return Err(StoreError::InvalidData("escrow ciphertext must not be empty".into()));
        }
        let mut inner = self.write()?;
        if let Some(existing) = inner.users.get(user) {
            if existing.public_key != record.public_key {
                return Err(StoreError::KeyConflict(format!(
                    "user {} already has a different public key",
                    user
                )));
            }
        }
        inner.users.insert(
            *user,
            StoredUser {
                public_key: record.public_key,
                escrow: Some((record.escrow.clone(), record.pin_hash.clone())),
            },
        );
        Ok(())
    }
}
