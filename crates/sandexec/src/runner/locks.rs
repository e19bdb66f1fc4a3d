//! Per-key lock registry
//!
//! Lock handles are created lazily. Lookups of existing keys only take the
//! read side of the registry; the write side is taken when a key is first
//! seen, and the entry is re-checked under it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

/// Lazily created async locks keyed by caller
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for `key`, creating it on first use
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self
            .locks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(lock);
        }

        let mut locks = self.locks.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Number of keys with a lock handle
    pub fn len(&self) -> usize {
        self.locks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget locks nobody outside the registry holds. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut locks = self.locks.write().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }
}
