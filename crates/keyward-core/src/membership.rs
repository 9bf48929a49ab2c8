//! Resource and membership records.
//!
//! A membership is a flat relation keyed by (user, resource). Each row
//! carries the resource key wrapped for that member alone.

use serde::{Deserialize, Serialize};

use crate::role::{ResourceKind, Role};
use crate::types::{ResourceId, UserId, WrappedKey};

/// A shared resource.
///
/// The creator is provenance and never changes, even if ownership moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub creator_id: UserId,
    /// Creation time (Unix ms).
    pub created_at: i64,
    /// External locator of the underlying document, such as a sheet URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Resource {
    /// Create a new resource record with a fresh id.
    pub fn new(kind: ResourceKind, creator_id: UserId, created_at: i64) -> Self {
        Self {
            id: ResourceId::generate(),
            kind,
            creator_id,
            created_at,
            link: None,
        }
    }

    /// Attach an external locator.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// One member's record for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub resource_id: ResourceId,
    pub role: Role,
    /// The resource key sealed for this member. Never empty.
    pub wrapped_key: WrappedKey,
    /// Per-user UI state, not a security attribute.
    pub is_favorite: bool,
    /// Last access (Unix ms), if the member ever opened the resource.
    pub last_accessed_at: Option<i64>,
}

impl Membership {
    /// Create a new membership with default metadata.
    pub fn new(
        user_id: UserId,
        resource_id: ResourceId,
        role: Role,
        wrapped_key: WrappedKey,
    ) -> Self {
        Self {
            user_id,
            resource_id,
            role,
            wrapped_key,
            is_favorite: false,
            last_accessed_at: None,
        }
    }
}

/// A member to be added, with the key already wrapped for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMember {
    pub user_id: UserId,
    pub role: Role,
    pub wrapped_key: WrappedKey,
}

impl NewMember {
    /// A viewer, the default role for invited members.
    pub fn viewer(user_id: UserId, wrapped_key: WrappedKey) -> Self {
        Self {
            user_id,
            role: Role::Viewer,
            wrapped_key,
        }
    }

    /// Set the role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Convert into a membership row for `resource_id`.
    pub fn into_membership(self, resource_id: ResourceId) -> Membership {
        Membership::new(self.user_id, resource_id, self.role, self.wrapped_key)
    }
}

/// Public view of a member: who, and with which role. No key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub role: Role,
}

impl From<&Membership> for MemberInfo {
    fn from(m: &Membership) -> Self {
        Self {
            user_id: m.user_id,
            role: m.role,
        }
    }
}

/// A resource as seen by one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceView {
    pub resource: Resource,
    pub role: Role,
    pub wrapped_key: WrappedKey,
    pub is_favorite: bool,
    pub last_accessed_at: Option<i64>,
}

impl ResourceView {
    /// Join a resource with the viewing member's record.
    pub fn new(resource: Resource, membership: Membership) -> Self {
        Self {
            resource,
            role: membership.role,
            wrapped_key: membership.wrapped_key,
            is_favorite: membership.is_favorite,
            last_accessed_at: membership.last_accessed_at,
        }
    }
}

/// One page of a listing. Pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
}

impl Page {
    /// Largest page a caller may ask for.
    pub const MAX_SIZE: usize = 100;

    pub fn new(page: usize, page_size: usize) -> Self {
        Self { page, page_size }
    }

    /// Rows to skip before this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }

    /// Whether the page number and size are in range.
    pub fn is_valid(&self) -> bool {
        self.page >= 1 && (1..=Self::MAX_SIZE).contains(&self.page_size)
    }
}

/// Filter for listing a user's resources. `None` fields match everything.
///
/// `page` is applied after filtering and ordering; `None` returns every row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    pub kind: Option<ResourceKind>,
    pub role: Option<Role>,
    pub favorite: Option<bool>,
    #[serde(default)]
    pub page: Option<Page>,
}

impl ResourceFilter {
    /// Whether a (resource, membership) pair passes this filter.
    pub fn matches(&self, resource: &Resource, membership: &Membership) -> bool {
        self.kind.map_or(true, |k| k == resource.kind)
            && self.role.map_or(true, |r| r == membership.role)
            && self.favorite.map_or(true, |f| f == membership.is_favorite)
    }
}
