//! Per-resource mutation locks.
//!
//! Mutations on one resource run one at a time so invariants are checked
//! against committed state. Different resources never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use keyward_core::ResourceId;

/// Async lock table keyed by resource.
///
/// Owned by the engine and dropped with it. Idle entries are pruned on
/// every acquire, so the table only holds resources with a live or
/// pending guard.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    table: Mutex<HashMap<ResourceId, Arc<AsyncMutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `resource`.
    pub async fn acquire(&self, resource: ResourceId) -> OwnedMutexGuard<()> {
        let lock = {
            // The table holds no invariants a panic could break.
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            table.entry(resource).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of resources with a live or pending guard.
    pub fn active(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}
