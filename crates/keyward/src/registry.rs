//! The membership registry.
//!
//! Authoritative (user, resource, role, wrapped key) records and the rules
//! around changing them. Every mutation runs under the resource's lock and
//! checks the actor's role against committed state.
//!
//! Invariants held after every successful call:
//! - a resource that exists has at least one owner
//! - one row per (user, resource)
//! - no row carries an empty wrapped key

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use keyward_core::{
    now_millis, MemberInfo, Membership, NewMember, Page, ResourceFilter, ResourceId,
    ResourceKind, ResourceView, Role, UserId, WrappedKey,
};
use keyward_perms::{can_grant, permits, Action};
use keyward_store::{InsertResult, Store};

use crate::error::{Error, Result};
use crate::locks::ResourceLocks;

/// Outcome of `add_members`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    /// Users that became members.
    pub added: Vec<UserId>,
    /// Users left untouched: already members, or repeated in the request.
    pub skipped: Vec<UserId>,
}

/// Outcome of `leave`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The membership was removed; others remain.
    Left,
    /// The leaver was the last member, so the resource was deleted too.
    ResourceDeleted,
}

/// Membership records and role hierarchy enforcement.
pub struct MembershipRegistry<S: Store> {
    store: Arc<S>,
    locks: Arc<ResourceLocks>,
    max_batch_size: usize,
}

impl<S: Store> MembershipRegistry<S> {
    pub fn new(store: Arc<S>, locks: Arc<ResourceLocks>, max_batch_size: usize) -> Self {
        Self {
            store,
            locks,
            max_batch_size,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Membership changes
    // ─────────────────────────────────────────────────────────────────────────

    /// Add members with keys the actor already wrapped for them.
    ///
    /// The actor must be at least an editor and cannot grant a role above
    /// their own. Users who are already members are skipped.
    pub async fn add_members(
        &self,
        actor: &UserId,
        resource: &ResourceId,
        members: Vec<NewMember>,
    ) -> Result<AddReport> {
        check_batch(members.len(), self.max_batch_size)?;

        let _guard = self.locks.acquire(*resource).await;
        let actor_row = authorize(&*self.store, actor, resource, Action::AddMembers).await?;
        if members.iter().any(|m| m.wrapped_key.is_empty()) {
            return Err(Error::InvalidInput("wrapped key must not be empty".into()));
        }

        if let Some(m) = members.iter().find(|m| !can_grant(actor_row.role, m.role)) {
            return Err(Error::PermissionDenied(format!(
                "{} cannot grant {} to {}",
                actor_row.role, m.role, m.user_id
            )));
        }

        let record = self
            .store
            .get_resource(resource)
            .await?
            .ok_or_else(|| Error::NotFound(format!("resource {}", resource)))?;
        let current: HashSet<UserId> = self
            .store
            .list_members(resource)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect();

        let mut seen = HashSet::new();
        let mut report = AddReport::default();
        let mut rows = Vec::new();
        for member in members {
            if current.contains(&member.user_id) || !seen.insert(member.user_id) {
                report.skipped.push(member.user_id);
            } else {
                rows.push(member.into_membership(*resource));
            }
        }

        if let Some(limit) = record.kind.member_limit() {
            if current.len() + rows.len() > limit {
                return Err(Error::InvalidInput(format!(
                    "{} holds at most {} members",
                    record.kind, limit
                )));
            }
        }

        if rows.is_empty() {
            debug!(resource = %resource, skipped = report.skipped.len(), "no new members to add");
            return Ok(report);
        }
        if record.kind == ResourceKind::DirectRoom {
            for row in &rows {
                for existing in &current {
                    let shared = self.store.find_direct_room(existing, &row.user_id).await?;
                    if let Some(other) = shared {
                        return Err(Error::DirectRoomExists { resource: other.id });
                    }
                }
            }
        }

        let results = self.store.insert_memberships(&rows).await?;
        for (row, result) in rows.iter().zip(results) {
            match result {
                InsertResult::Inserted => report.added.push(row.user_id),
                InsertResult::AlreadyExists => report.skipped.push(row.user_id),
            }
        }

        info!(
            resource = %resource,
            actor = %actor,
            added = report.added.len(),
            skipped = report.skipped.len(),
            "added members"
        );
        Ok(report)
    }

    /// List form of [`add_members`](Self::add_members): parallel user and
    /// key lists, with optional roles defaulting to viewer.
    pub async fn add_members_from_lists(
        &self,
        actor: &UserId,
        resource: &ResourceId,
        user_ids: &[UserId],
        wrapped_keys: Vec<WrappedKey>,
        roles: Option<&[Role]>,
    ) -> Result<AddReport> {
        if user_ids.len() != wrapped_keys.len() {
            return Err(Error::InvalidInput(format!(
                "{} users but {} wrapped keys",
                user_ids.len(),
                wrapped_keys.len()
            )));
        }
        if let Some(roles) = roles {
            if roles.len() != user_ids.len() {
                return Err(Error::InvalidInput(format!(
                    "{} users but {} roles",
                    user_ids.len(),
                    roles.len()
                )));
            }
        }

        let members = user_ids
            .iter()
            .zip(wrapped_keys)
            .enumerate()
            .map(|(i, (user_id, wrapped_key))| NewMember {
                user_id: *user_id,
                role: roles.map_or(Role::Viewer, |r| r[i]),
                wrapped_key,
            })
            .collect();
        self.add_members(actor, resource, members).await
    }

    /// Remove other members. Owner only; the actor must use `leave` for
    /// themselves. Users who are not members are ignored.
    pub async fn remove_members(
        &self,
        actor: &UserId,
        resource: &ResourceId,
        users: &[UserId],
    ) -> Result<usize> {
        check_batch(users.len(), self.max_batch_size)?;

        let _guard = self.locks.acquire(*resource).await;
        authorize(&*self.store, actor, resource, Action::RemoveMembers).await?;

        if users.contains(actor) {
            return Err(Error::PermissionDenied(
                "cannot remove yourself; leave the resource instead".into(),
            ));
        }

        let removed = self.store.delete_memberships(resource, users).await?;
        info!(resource = %resource, actor = %actor, count = removed, "removed members");
        Ok(removed)
    }

    /// Leave a resource.
    ///
    /// A sole owner must transfer ownership first while others remain. The
    /// last member leaving deletes the resource.
    pub async fn leave(&self, user: &UserId, resource: &ResourceId) -> Result<LeaveOutcome> {
        let _guard = self.locks.acquire(*resource).await;

        let members = self.store.list_members(resource).await?;
        let row = members
            .iter()
            .find(|m| m.user_id == *user)
            .ok_or_else(|| not_a_member(user, resource))?;

        if members.len() == 1 {
            self.store.delete_resource(resource).await?;
            info!(resource = %resource, user = %user, "last member left, resource deleted");
            return Ok(LeaveOutcome::ResourceDeleted);
        }

        if row.role == Role::Owner && count_owners(&members) == 1 {
            return Err(Error::OwnerMustTransferFirst {
                resource: *resource,
            });
        }

        self.store.delete_membership(user, resource).await?;
        info!(resource = %resource, user = %user, "member left");
        Ok(LeaveOutcome::Left)
    }

    /// Change a member's role. Owner only.
    pub async fn update_role(
        &self,
        actor: &UserId,
        resource: &ResourceId,
        target: &UserId,
        new_role: Role,
    ) -> Result<()> {
        let _guard = self.locks.acquire(*resource).await;
        authorize(&*self.store, actor, resource, Action::ChangeRole).await?;

        let members = self.store.list_members(resource).await?;
        let mut row = members
            .iter()
            .find(|m| m.user_id == *target)
            .cloned()
            .ok_or_else(|| not_a_member(target, resource))?;

        if row.role == new_role {
            debug!(resource = %resource, target = %target, role = %new_role, "role unchanged");
            return Ok(());
        }
        if row.role == Role::Owner && count_owners(&members) == 1 {
            return Err(Error::LastOwnerDemotion {
                resource: *resource,
            });
        }

        let old_role = row.role;
        row.role = new_role;
        self.store.save_membership(&row).await?;
        info!(
            resource = %resource,
            actor = %actor,
            target = %target,
            from = %old_role,
            to = %new_role,
            "updated role"
        );
        Ok(())
    }

    /// Make `target` an owner and demote the actor to editor, atomically.
    pub async fn transfer_ownership(
        &self,
        actor: &UserId,
        resource: &ResourceId,
        target: &UserId,
    ) -> Result<()> {
        if actor == target {
            return Err(Error::InvalidInput("cannot transfer ownership to yourself".into()));
        }

        let _guard = self.locks.acquire(*resource).await;
        let mut actor_row =
            authorize(&*self.store, actor, resource, Action::TransferOwnership).await?;
        let mut target_row = self
            .store
            .load_membership(target, resource)
            .await?
            .ok_or_else(|| not_a_member(target, resource))?;

        target_row.role = Role::Owner;
        actor_row.role = Role::Editor;
        self.store
            .save_memberships(&[target_row, actor_row])
            .await?;

        info!(resource = %resource, from = %actor, to = %target, "transferred ownership");
        Ok(())
    }

    /// Replace one member's wrapped key.
    ///
    /// Members may always replace their own; owners may push a key for
    /// anyone.
    pub async fn update_wrapped_key(
        &self,
        actor: &UserId,
        resource: &ResourceId,
        target: &UserId,
        wrapped_key: WrappedKey,
    ) -> Result<()> {
        let _guard = self.locks.acquire(*resource).await;
        let action = if actor == target {
            Action::Decrypt
        } else {
            Action::PushKeyForOthers
        };
        let actor_row = authorize(&*self.store, actor, resource, action).await?;
        if wrapped_key.is_empty() {
            return Err(Error::InvalidInput("wrapped key must not be empty".into()));
        }

        let mut row = if actor == target {
            actor_row
        } else {
            self.store
                .load_membership(target, resource)
                .await?
                .ok_or_else(|| not_a_member(target, resource))?
        };
        row.wrapped_key = wrapped_key;
        self.store.save_membership(&row).await?;

        debug!(resource = %resource, actor = %actor, target = %target, "replaced wrapped key");
        Ok(())
    }

    /// Set the caller's own favorite flag.
    pub async fn toggle_favorite(
        &self,
        user: &UserId,
        resource: &ResourceId,
        favorite: bool,
    ) -> Result<()> {
        let _guard = self.locks.acquire(*resource).await;
        let mut row = authorize(&*self.store, user, resource, Action::Decrypt).await?;
        if row.is_favorite != favorite {
            row.is_favorite = favorite;
            self.store.save_membership(&row).await?;
        }
        Ok(())
    }

    /// Record that the user opened the resource now.
    pub async fn touch(&self, user: &UserId, resource: &ResourceId) -> Result<()> {
        let _guard = self.locks.acquire(*resource).await;
        let mut row = authorize(&*self.store, user, resource, Action::Decrypt).await?;
        row.last_accessed_at = Some(now_millis());
        self.store.save_membership(&row).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// The user's role, or `None` if they are not a member.
    pub async fn get_role(&self, user: &UserId, resource: &ResourceId) -> Result<Option<Role>> {
        Ok(self
            .store
            .load_membership(user, resource)
            .await?
            .map(|m| m.role))
    }

    /// Whether the user's role meets `required`.
    pub async fn has_permission(
        &self,
        user: &UserId,
        resource: &ResourceId,
        required: Role,
    ) -> Result<bool> {
        Ok(self
            .get_role(user, resource)
            .await?
            .map_or(false, |role| role.satisfies(required)))
    }

    /// The user's own wrapped copy of the resource key.
    pub async fn get_wrapped_key(&self, user: &UserId, resource: &ResourceId) -> Result<WrappedKey> {
        let row = authorize(&*self.store, user, resource, Action::Decrypt).await?;
        Ok(row.wrapped_key)
    }

    /// Members and their roles, owners first. The actor must be a member.
    pub async fn list_members(
        &self,
        actor: &UserId,
        resource: &ResourceId,
    ) -> Result<Vec<MemberInfo>> {
        authorize(&*self.store, actor, resource, Action::ListMembers).await?;
        let mut members: Vec<MemberInfo> = self
            .store
            .list_members(resource)
            .await?
            .iter()
            .map(MemberInfo::from)
            .collect();
        members.sort_by(|a, b| b.role.cmp(&a.role).then(a.user_id.cmp(&b.user_id)));
        Ok(members)
    }

    /// Resources the user belongs to, most recently used first.
    pub async fn list_resources(
        &self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceView>> {
        if let Some(page) = filter.page {
            if !page.is_valid() {
                return Err(Error::InvalidInput(format!(
                    "page must be at least 1 and page size between 1 and {}",
                    Page::MAX_SIZE
                )));
            }
        }
        Ok(self
            .store
            .list_resources_for_user(user, filter)
            .await?
            .into_iter()
            .map(|(resource, membership)| ResourceView::new(resource, membership))
            .collect())
    }

    /// Find one of `user`'s resources by its external link.
    ///
    /// `NotFound` both when no resource has the link and when the user is
    /// not a member of it.
    pub async fn find_by_link(&self, user: &UserId, link: &str) -> Result<ResourceView> {
        self.store
            .find_resource_by_link(user, link.trim())
            .await?
            .map(|(resource, membership)| ResourceView::new(resource, membership))
            .ok_or_else(|| Error::NotFound("no resource with that link".into()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers shared with resource lifecycle operations
// ────────────────────────────────────────────────────────────────────────────

/// Load the actor's membership and check it permits `action`.
///
/// `NotFound` if the resource does not exist, `PermissionDenied` if the
/// actor is not a member or their role is too low.
pub(crate) async fn authorize<S: Store + ?Sized>(
    store: &S,
    actor: &UserId,
    resource: &ResourceId,
    action: Action,
) -> Result<Membership> {
    match store.load_membership(actor, resource).await? {
        Some(row) if permits(Some(row.role), action) => Ok(row),
        Some(row) => Err(Error::PermissionDenied(format!(
            "{} requires {}, {} is {}",
            action,
            action.required_role(),
            actor,
            row.role
        ))),
        None if store.get_resource(resource).await?.is_none() => {
            Err(Error::NotFound(format!("resource {}", resource)))
        }
        None => Err(Error::PermissionDenied(format!(
            "{} is not a member of {}",
            actor, resource
        ))),
    }
}

pub(crate) fn check_batch(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(Error::InvalidInput(format!(
            "batch of {} exceeds limit of {}",
            len, max
        )));
    }
    Ok(())
}

fn count_owners(members: &[Membership]) -> usize {
    members.iter().filter(|m| m.role == Role::Owner).count()
}

fn not_a_member(user: &UserId, resource: &ResourceId) -> Error {
    Error::NotFound(format!("{} is not a member of {}", user, resource))
}
