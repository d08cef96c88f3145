//! Keyed mutual exclusion for service operations
//!
//! An operation takes every key it needs in one step, so two operations never hold
//! part of each other's keys and cannot deadlock.
use std::collections::{BTreeSet, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Supplier(String),
    Request(String),
}

#[derive(Default)]
pub struct LockTable {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

pub struct LockGuard<'a> {
    table: &'a LockTable,
    keys: BTreeSet<LockKey>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<LockKey>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks until none of `keys` is held by another guard.
    pub fn acquire(&self, keys: BTreeSet<LockKey>) -> LockGuard<'_> {
        let mut held = self.held();
        while keys.iter().any(|key| held.contains(key)) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.extend(keys.iter().cloned());
        trace!(keys = ?keys, "locks acquired");

        LockGuard { table: self, keys }
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        self.held().contains(key)
    }
}

impl LockGuard<'_> {
    pub fn covers(&self, keys: &BTreeSet<LockKey>) -> bool {
        keys.is_subset(&self.keys)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.table.held();
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.table.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn keys(names: &[&str]) -> BTreeSet<LockKey> {
        names
            .iter()
            .map(|name| LockKey::Supplier(name.to_string()))
            .collect()
    }

    #[test]
    fn guard_releases_on_drop() {
        let table = LockTable::new();
        {
            let guard = table.acquire(keys(&["a", "b"]));
            assert!(guard.covers(&keys(&["a"])));
            assert!(table.is_held(&LockKey::Supplier("b".into())));
        }
        assert!(!table.is_held(&LockKey::Supplier("a".into())));
    }

    #[test]
    fn overlapping_sets_are_serialised() {
        let table = Arc::new(LockTable::new());
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                let inside = inside.clone();
                thread::spawn(move || {
                    let set = if i % 2 == 0 { keys(&["a", "b"]) } else { keys(&["b", "c"]) };
                    let _guard = table.acquire(set);
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
