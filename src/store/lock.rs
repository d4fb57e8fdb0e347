//! Per-resource write locks
//!
//! Writes to the same `(namespace, logicalKey)` must not race each other,
//! but unrelated keys must never share a lock. The table hands out one
//! async mutex per key and drops the slot again once no writer holds it,
//! so idle keys cost nothing.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Garbage-collected table of per-key async mutexes
#[derive(Default)]
pub struct KeyLockTable {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLockTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a key, waiting if another writer holds it
    pub async fn acquire(&self, key: &str) -> KeyLockGuard {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let guard = lock.lock_owned().await;
        KeyLockGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of keys with a live lock slot
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True if no key currently has a lock slot
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds a key's write lock until dropped
pub struct KeyLockGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        // Release the mutex first, then drop the slot if nobody else holds
        // the Arc (the map's reference is the last one)
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

// =============================================================================
// Tests
// =============================================================================
