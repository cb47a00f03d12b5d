//! Per-key async locks making cache get-or-compute single-flight

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A map of async mutexes, one per cache key
///
/// Holders of the same key run one at a time; different keys never wait on
/// each other. Entries are created on demand and pruned once unused.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .entries()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry for `key` when nobody holds or waits on it
    ///
    /// Call after the guard returned by `acquire` has been dropped.
    pub fn prune(&self, key: &str) {
        let mut entries = self.entries();
        if entries
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            entries.remove(key);
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
