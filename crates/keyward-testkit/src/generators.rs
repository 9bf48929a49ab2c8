//! Proptest generators for property-based testing.

use proptest::prelude::*;

use keyward_core::{ResourceId, ResourceKind, Role, UserId, WrappedKey};
use keyward_perms::{PrivateKey, ResourceKey};

/// Generate a random UserId.
pub fn user_id() -> impl Strategy<Value = UserId> {
    any::<[u8; 16]>().prop_map(UserId::from_bytes)
}

/// Generate a random ResourceId.
pub fn resource_id() -> impl Strategy<Value = ResourceId> {
    any::<[u8; 16]>().prop_map(ResourceId::from_bytes)
}

/// Generate a role.
pub fn role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Viewer), Just(Role::Editor), Just(Role::Owner)]
}

/// Generate a resource kind.
pub fn resource_kind() -> impl Strategy<Value = ResourceKind> {
    prop_oneof![
        Just(ResourceKind::Sheet),
        Just(ResourceKind::GroupRoom),
        Just(ResourceKind::DirectRoom),
    ]
}

/// Generate an X25519 private key.
pub fn private_key() -> impl Strategy<Value = PrivateKey> {
    any::<[u8; 32]>().prop_map(PrivateKey::from_bytes)
}

/// Generate a resource key.
pub fn resource_key() -> impl Strategy<Value = ResourceKey> {
    any::<[u8; 32]>().prop_map(ResourceKey::from_bytes)
}

/// Generate opaque non-empty wrapped key bytes.
pub fn wrapped_key() -> impl Strategy<Value = WrappedKey> {
    prop::collection::vec(any::<u8>(), 1..=96).prop_map(WrappedKey::from_bytes)
}

/// Generate a numeric PIN of 4 to 8 digits.
pub fn pin() -> impl Strategy<Value = String> {
    "[0-9]{4,8}".prop_map(String::from)
}

/// Generate content bytes of specified max length.
pub fn content(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// A membership change, for driving the registry through random sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipOp {
    /// Member at `actor` adds a new user with `role`.
    Add { actor: usize, role: Role },
    /// Member at `actor` removes member at `target`.
    Remove { actor: usize, target: usize },
    /// Member at `actor` sets member at `target` to `role`.
    ChangeRole { actor: usize, target: usize, role: Role },
    /// Member at `actor` leaves.
    Leave { actor: usize },
}

/// Generate a membership change. Indices are taken modulo the current
/// member count by the driver.
pub fn membership_op() -> impl Strategy<Value = MembershipOp> {
    prop_oneof![
        3 => (any::<usize>(), role()).prop_map(|(actor, role)| MembershipOp::Add { actor, role }),
        2 => (any::<usize>(), any::<usize>())
            .prop_map(|(actor, target)| MembershipOp::Remove { actor, target }),
        2 => (any::<usize>(), any::<usize>(), role())
            .prop_map(|(actor, target, role)| MembershipOp::ChangeRole { actor, target, role }),
        1 => any::<usize>().prop_map(|actor| MembershipOp::Leave { actor }),
    ]
}
