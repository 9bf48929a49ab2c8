//! # Keyward Core
//!
//! Pure types for the Keyward engine: identifiers, roles, resource kinds and
//! membership records.
//!
//! This crate contains no I/O and no cryptography. It defines the shapes that
//! the permission, storage and engine crates agree on.
//!
//! ## Key Types
//!
//! - [`UserId`] / [`ResourceId`] - 16-byte opaque identifiers
//! - [`Role`] - the closed role hierarchy `Owner > Editor > Viewer`
//! - [`ResourceKind`] - sheets, group rooms and direct rooms
//! - [`Membership`] - one (user, resource) record with its wrapped key
//! - [`WrappedKey`] - a resource key sealed for a single member

pub mod error;
pub mod membership;
pub mod role;
pub mod types;

pub use error::{CoreError, Result};
pub use membership::{
    MemberInfo, Membership, NewMember, Page, Resource, ResourceFilter, ResourceView,
};
pub use role::{ResourceKind, Role};
pub use types::{now_millis, ResourceId, UserId, WrappedKey};
