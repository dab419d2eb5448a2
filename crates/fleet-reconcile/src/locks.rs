//! Per-fingerprint serialization.
//!
//! A table of async mutexes keyed by fingerprint. A merge locks every key
//! it may read or write, in sorted order, so two merges touching the same
//! record never interleave and lock acquisition cannot deadlock. Entries
//! are dropped from the table once no guard or waiter references them.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type KeyLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
pub struct KeyedLocks {
    table: Mutex<HashMap<String, KeyLock>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key in `keys`. Held until the returned guard drops.
    pub async fn lock_all(&self, keys: &BTreeSet<String>) -> KeyedGuard<'_> {
        let mut held = Vec::with_capacity(keys.len());
        // BTreeSet iterates in sorted order.
        for key in keys {
            let lock = {
                let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
                table.entry(key.clone()).or_default().clone()
            };
            held.push((key.clone(), lock.lock_owned().await));
        }
        KeyedGuard { locks: self, held }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Guard over a set of fingerprint keys.
pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    held: Vec<(String, OwnedMutexGuard<()>)>,
}

impl KeyedGuard<'_> {
    pub fn holds(&self, key: &str) -> bool {
        self.held.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(|(k, _)| k.as_str())
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.locks.table.lock().unwrap_or_else(|e| e.into_inner());
        for (key, guard) in self.held.drain(..) {
            drop(guard);
            // Only the table's own reference left: nobody holds or waits.
            if table.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                table.remove(&key);
            }
        }
    }
}
