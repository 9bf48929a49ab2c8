//! # Keyward
//!
//! Key distribution, membership and access control for end-to-end
//! encrypted shared resources.
//!
//! ## Overview
//!
//! Each resource (a sheet, a group room or a direct room) has one symmetric
//! key. The server never sees it in the clear: it stores one copy per member,
//! wrapped under that member's public key. Private keys can be escrowed on
//! the server under a PIN so a user can recover them on a new device.
//!
//! - **Registry**: who is a member, with which role and which wrapped key
//! - **Lifecycle**: creating, deleting and re-keying resources
//! - **Keys**: public key registration and PIN escrow
//! - **Policy**: the minimum role for every action
//!
//! ## Roles
//!
//! `viewer < editor < owner`. Viewers decrypt. Editors also write and
//! invite. Owners manage membership, rotate keys and delete.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyward::{Engine, EngineConfig};
//! use keyward::core::{ResourceKind, UserId};
//! use keyward::store::SqliteStore;
//!
//! async fn example() {
//!     let store = SqliteStore::open("keyward.db").unwrap();
//!     let engine = Engine::new(store, EngineConfig::default());
//!
//!     let alice = UserId::generate();
//!     let keys = engine.keys().provision_user_keys(&alice, "4821").await.unwrap();
//!
//!     let created = engine
//!         .lifecycle()
//!         .create_resource(&alice, ResourceKind::Sheet, &[])
//!         .await
//!         .unwrap();
//!
//!     let stored = engine
//!         .encrypt_content(&alice, &created.resource.id, &keys.private_key, b"hello")
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `keyward::core` - Identifiers, roles, resources and memberships
//! - `keyward::perms` - Key wrapping, escrow, content envelope and policy
//! - `keyward::store` - Storage abstraction, SQLite and in-memory stores

pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod lifecycle;
pub mod locks;
pub mod registry;

// Re-export component crates
pub use keyward_core as core;
pub use keyward_perms as perms;
pub use keyward_store as store;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use keys::{KeyEscrow, ProvisionedKeys};
pub use lifecycle::{CreatedResource, ResourceLifecycle, MAX_LINK_LEN};
pub use locks::ResourceLocks;
pub use registry::{AddReport, LeaveOutcome, MembershipRegistry};

pub use keyward_core::{
    MemberInfo, Membership, NewMember, Page, Resource, ResourceFilter, ResourceId, ResourceKind,
    ResourceView, Role, UserId, WrappedKey,
};
