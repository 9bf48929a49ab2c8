//! # Keyward Testkit
//!
//! Testing utilities for Keyward.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: users with key pairs and ready-made engines
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use keyward_testkit::{engine_with_memory_store, TestUser};
//!
//! let engine = engine_with_memory_store();
//! let alice = TestUser::new();
//! alice.enroll(&engine).await;
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keyward_testkit::generators::{pin, private_key};
//!
//! proptest! {
//!     #[test]
//!     fn escrow_roundtrip(key in private_key(), pin in pin()) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{engine_with_memory_store, init_tracing, test_config, test_users, TestUser};
pub use generators::MembershipOp;
