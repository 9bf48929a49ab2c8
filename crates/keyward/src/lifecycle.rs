//! Resource lifecycle: creation, deletion and key rotation.
//!
//! These operations touch the resource key itself, so they are the only
//! place the engine mints keys or wraps them on the server.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use keyward_core::{
    now_millis, MemberInfo, Membership, NewMember, Resource, ResourceId, ResourceKind, Role,
    UserId, WrappedKey,
};
use keyward_perms::{Action, PublicKey, ResourceKeyService};
use keyward_store::Store;

use crate::engine::offload;
use crate::error::{Error, Result};
use crate::locks::ResourceLocks;
use crate::registry::{authorize, check_batch};

/// A freshly created resource and its initial members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    pub resource: Resource,
    pub members: Vec<MemberInfo>,
}

/// Longest accepted external locator.
pub const MAX_LINK_LEN: usize = 1000;

/// Creates, deletes and re-keys resources.
pub struct ResourceLifecycle<S: Store> {
    store: Arc<S>,
    locks: Arc<ResourceLocks>,
    keys: ResourceKeyService,
    max_batch_size: usize,
    /// Serializes the exists-then-insert step of direct room creation.
    direct_rooms: Mutex<()>,
}

impl<S: Store> ResourceLifecycle<S> {
    pub fn new(store: Arc<S>, locks: Arc<ResourceLocks>, max_batch_size: usize) -> Self {
        Self {
            store,
            locks,
            keys: ResourceKeyService::new(),
            max_batch_size,
            direct_rooms: Mutex::new(()),
        }
    }

    /// Create a resource with a server-minted key.
    ///
    /// The key is wrapped for the creator, who becomes owner, and for every
    /// initial member, who become viewers. Every participant needs a
    /// registered public key.
    ///
    /// A direct room needs exactly one other member, and two users share at
    /// most one direct room.
    pub async fn create_resource(
        &self,
        creator: &UserId,
        kind: ResourceKind,
        initial_members: &[UserId],
    ) -> Result<CreatedResource> {
        let members = dedupe_excluding(creator, initial_members.iter().copied());
        check_batch(members.len(), self.max_batch_size)?;
        check_limit(kind, members.len() + 1)?;
        let _claim = self.claim_direct_room(kind, creator, &members).await?;

        let mut recipients = Vec::with_capacity(members.len() + 1);
        for user in std::iter::once(*creator).chain(members) {
            recipients.push((user, self.public_key_of(&user).await?));
        }

        let keys = self.keys;
        let issued = offload(move || Ok(keys.issue_for_members(&recipients)?)).await?;

        let resource = Resource::new(kind, *creator, now_millis());
        let rows: Vec<Membership> = issued
            .into_iter()
            .map(|issued| {
                let role = if issued.user_id == *creator {
                    Role::Owner
                } else {
                    Role::Viewer
                };
                Membership::new(issued.user_id, resource.id, role, issued.wrapped_key)
            })
            .collect();
        self.store.insert_resource(&resource, &rows).await?;

        info!(
            resource = %resource.id,
            kind = %kind,
            creator = %creator,
            count = rows.len(),
            "created resource"
        );
        Ok(CreatedResource {
            resource,
            members: rows.iter().map(MemberInfo::from).collect(),
        })
    }

    /// Create a resource with keys the creator wrapped on their device.
    ///
    /// Members repeated in the list, or naming the creator, are skipped.
    /// `link` records where the encrypted document lives; members can
    /// later find the resource by it.
    pub async fn create_resource_with_keys(
        &self,
        creator: &UserId,
        kind: ResourceKind,
        creator_wrapped_key: WrappedKey,
        members: Vec<NewMember>,
        link: Option<&str>,
    ) -> Result<CreatedResource> {
        check_batch(members.len(), self.max_batch_size)?;
        if creator_wrapped_key.is_empty() || members.iter().any(|m| m.wrapped_key.is_empty()) {
            return Err(Error::InvalidInput("wrapped key must not be empty".into()));
        }

        let mut resource = Resource::new(kind, *creator, now_millis());
        if let Some(link) = link {
            resource = resource.with_link(check_link(link)?);
        }
        let mut seen = HashSet::from([*creator]);
        let mut rows = vec![Membership::new(
            *creator,
            resource.id,
            Role::Owner,
            creator_wrapped_key,
        )];
        rows.extend(
            members
                .into_iter()
                .filter(|m| seen.insert(m.user_id))
                .map(|m| m.into_membership(resource.id)),
        );
        check_limit(kind, rows.len())?;
        let others: Vec<UserId> = rows[1..].iter().map(|m| m.user_id).collect();
        let _claim = self.claim_direct_room(kind, creator, &others).await?;

        self.store.insert_resource(&resource, &rows).await?;

        info!(
            resource = %resource.id,
            kind = %kind,
            creator = %creator,
            count = rows.len(),
            "created resource with client keys"
        );
        Ok(CreatedResource {
            resource,
            members: rows.iter().map(MemberInfo::from).collect(),
        })
    }

    /// Delete a resource and every membership in it. Owner only.
    pub async fn delete_resource(&self, actor: &UserId, resource: &ResourceId) -> Result<()> {
        let _guard = self.locks.acquire(*resource).await;
        authorize(&*self.store, actor, resource, Action::DeleteResource).await?;

        self.store.delete_resource(resource).await?;
        info!(resource = %resource, actor = %actor, "deleted resource");
        Ok(())
    }

    /// Rotate the resource key on the server and rewrap it for every
    /// current member. Returns the number of members rewrapped.
    ///
    /// Aborts before writing anything if a member has no public key.
    pub async fn rekey_resource(&self, actor: &UserId, resource: &ResourceId) -> Result<usize> {
        let _guard = self.locks.acquire(*resource).await;
        authorize(&*self.store, actor, resource, Action::Rekey).await?;

        let members = self.store.list_members(resource).await?;
        let mut recipients: Vec<(UserId, PublicKey)> = Vec::with_capacity(members.len());
        for member in &members {
            recipients.push((member.user_id, self.public_key_of(&member.user_id).await?));
        }

        let keys = self.keys;
        let issued = offload(move || Ok(keys.rekey(&recipients)?)).await?;
        let replacements: Vec<(UserId, WrappedKey)> = issued
            .into_iter()
            .map(|issued| (issued.user_id, issued.wrapped_key))
            .collect();
        self.store
            .replace_wrapped_keys(resource, &replacements)
            .await?;

        info!(resource = %resource, actor = %actor, count = replacements.len(), "rekeyed resource");
        Ok(replacements.len())
    }

    /// Install a key rotation performed on the owner's device.
    ///
    /// `keys` must hold exactly one non-empty wrapped key per current member.
    pub async fn install_rotated_keys(
        &self,
        actor: &UserId,
        resource: &ResourceId,
        keys: Vec<(UserId, WrappedKey)>,
    ) -> Result<()> {
        check_batch(keys.len(), self.max_batch_size)?;
        if keys.iter().any(|(_, key)| key.is_empty()) {
            return Err(Error::InvalidInput("wrapped key must not be empty".into()));
        }
        let given: HashSet<UserId> = keys.iter().map(|(user, _)| *user).collect();
        if given.len() != keys.len() {
            return Err(Error::InvalidInput("duplicate user in rotated keys".into()));
        }

        let _guard = self.locks.acquire(*resource).await;
        authorize(&*self.store, actor, resource, Action::Rekey).await?;

        let current: HashSet<UserId> = self
            .store
            .list_members(resource)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        if current != given {
            return Err(Error::InvalidInput(format!(
                "rotated keys cover {} users, resource has {} members",
                given.len(),
                current.len()
            )));
        }

        self.store.replace_wrapped_keys(resource, &keys).await?;
        info!(resource = %resource, actor = %actor, count = keys.len(), "installed rotated keys");
        Ok(())
    }

    /// The direct room two users share, if any.
    pub async fn direct_room_between(
        &self,
        user: &UserId,
        other: &UserId,
    ) -> Result<Option<Resource>> {
        Ok(self.store.find_direct_room(user, other).await?)
    }

    /// Check the direct room rules and hold the creation lock until the
    /// caller has inserted the room. Other kinds pass through unlocked.
    async fn claim_direct_room(
        &self,
        kind: ResourceKind,
        creator: &UserId,
        others: &[UserId],
    ) -> Result<Option<MutexGuard<'_, ()>>> {
        if kind != ResourceKind::DirectRoom {
            return Ok(None);
        }
        let [other] = others else {
            return Err(Error::InvalidInput(
                "a direct room needs exactly one other member".into(),
            ));
        };

        let guard = self.direct_rooms.lock().await;
        if let Some(existing) = self.store.find_direct_room(creator, other).await? {
            debug!(resource = %existing.id, other = %other, "direct room exists");
            return Err(Error::DirectRoomExists {
                resource: existing.id,
            });
        }
        Ok(Some(guard))
    }

    async fn public_key_of(&self, user: &UserId) -> Result<PublicKey> {
        self.store
            .load_user_public_key(user)
            .await?
            .ok_or_else(|| Error::NotFound(format!("public key for {}", user)))
    }
}

fn dedupe_excluding(exclude: &UserId, users: impl Iterator<Item = UserId>) -> Vec<UserId> {
    let mut seen = HashSet::from([*exclude]);
    users.filter(|user| seen.insert(*user)).collect()
}

fn check_link(link: &str) -> Result<&str> {
    let link = link.trim();
    if link.is_empty() {
        return Err(Error::InvalidInput("link must not be empty".into()));
    }
    if link.len() > MAX_LINK_LEN {
        return Err(Error::InvalidInput(format!(
            "link longer than {} bytes",
            MAX_LINK_LEN
        )));
    }
    Ok(link)
}

fn check_limit(kind: ResourceKind, members: usize) -> Result<()> {
    match kind.member_limit() {
        Some(limit) if members > limit => Err(Error::InvalidInput(format!(
            "{} holds at most {} members",
            kind, limit
        ))),
        _ => Ok(()),
    }
}
