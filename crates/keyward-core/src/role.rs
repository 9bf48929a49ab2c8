//! Roles and resource kinds.
//!
//! Both are closed enums. Role comparison is defined once, by the derived
//! `Ord` on [`Role`]: variants are declared from weakest to strongest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A member's role within a resource.
///
/// Ordering is strict: `Owner > Editor > Viewer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can decrypt and read.
    Viewer,
    /// Can also mutate content and add members.
    Editor,
    /// Full control: remove members, change roles, re-key, delete.
    Owner,
}

impl Role {
    /// All roles from weakest to strongest.
    pub const ALL: [Role; 3] = [Role::Viewer, Role::Editor, Role::Owner];

    /// Whether this role meets or exceeds `required`.
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }

    /// Stable string form used in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "owner" => Ok(Role::Owner),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

/// The kind of shared resource.
///
/// Every kind is served by the same engine; kinds differ only in
/// membership limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A collaborative spreadsheet.
    Sheet,
    /// A chat room with any number of members.
    GroupRoom,
    /// A one-to-one chat room.
    DirectRoom,
}

impl ResourceKind {
    /// Maximum number of members, if the kind is bounded.
    pub const fn member_limit(self) -> Option<usize> {
        match self {
            ResourceKind::DirectRoom => Some(2),
            ResourceKind::Sheet | ResourceKind::GroupRoom => None,
        }
    }

    /// Stable string form used in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Sheet => "sheet",
            ResourceKind::GroupRoom => "group_room",
            ResourceKind::DirectRoom => "direct_room",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sheet" => Ok(ResourceKind::Sheet),
            "group_room" => Ok(ResourceKind::GroupRoom),
            "direct_room" => Ok(ResourceKind::DirectRoom),
            other => Err(CoreError::UnknownResourceKind(other.to_string())),
        }
    }
}
