//! # Keyward Store
//!
//! Storage abstraction for Keyward. Provides a trait-based interface for
//! resources, memberships and user key material, with SQLite and in-memory
//! implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`InsertResult`] - Result of inserting a membership row
//! - [`UserKeyRecord`] - Public key, escrow and PIN hash written together
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyward_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("keyward.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: inserting an existing membership returns `AlreadyExists`
//! - **Atomic batches**: bulk writes commit all rows or none
//! - **Cascade**: deleting a resource removes its memberships

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, Store, UserKeyRecord};
