//! Access control policy.
//!
//! Stateless predicates mapping an action to the minimum role that may
//! perform it. Role comparison itself lives in `Role`'s ordering.

use std::fmt;

use keyward_core::Role;

/// Something a member may try to do to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Fetch the wrapped key and read content.
    Decrypt,
    /// See who else is a member.
    ListMembers,
    /// Write content.
    MutateContent,
    /// Invite new members.
    AddMembers,
    /// Remove other members.
    RemoveMembers,
    /// Change another member's role.
    ChangeRole,
    /// Hand the owner role to someone else.
    TransferOwnership,
    /// Replace another member's wrapped key.
    PushKeyForOthers,
    /// Rotate the resource key.
    Rekey,
    /// Delete the resource for everyone.
    DeleteResource,
}

impl Action {
    /// The minimum role required for this action.
    pub const fn required_role(self) -> Role {
        match self {
            Action::Decrypt | Action::ListMembers => min_role_to_decrypt(),
            Action::MutateContent => min_role_to_mutate_content(),
            Action::AddMembers => min_role_to_add_members(),
            Action::RemoveMembers
            | Action::ChangeRole
            | Action::TransferOwnership
            | Action::PushKeyForOthers
            | Action::Rekey
            | Action::DeleteResource => min_role_to_manage_membership(),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Action::Decrypt => "decrypt",
            Action::ListMembers => "list members",
            Action::MutateContent => "mutate content",
            Action::AddMembers => "add members",
            Action::RemoveMembers => "remove members",
            Action::ChangeRole => "change role",
            Action::TransferOwnership => "transfer ownership",
            Action::PushKeyForOthers => "push key for others",
            Action::Rekey => "rekey",
            Action::DeleteResource => "delete resource",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const fn min_role_to_decrypt() -> Role {
    Role::Viewer
}

pub const fn min_role_to_mutate_content() -> Role {
    Role::Editor
}

pub const fn min_role_to_add_members() -> Role {
    Role::Editor
}

pub const fn min_role_to_manage_membership() -> Role {
    Role::Owner
}

/// Whether a member holding `role` (or a non-member, `None`) may perform `action`.
pub fn permits(role: Option<Role>, action: Action) -> bool {
    role.map_or(false, |r| r.satisfies(action.required_role()))
}

/// Whether `actor` may hand out `granted` when adding a member.
///
/// Nobody can grant above their own role, so an editor cannot mint owners.
pub fn can_grant(actor: Role, granted: Role) -> bool {
    actor.satisfies(min_role_to_add_members()) && actor.satisfies(granted)
}
