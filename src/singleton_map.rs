//! A concurrent, key-keyed factory cache with exactly-once construction per key.
//!
//! Concurrent callers requesting the same key block on the first caller's construction and
//! then observe the same value (or the same failure). A failed construction does not poison
//! the key: a later call re-attempts from scratch. Callers typically instantiate this with a
//! `V` that is itself cheap to clone (an `Arc<...>`) so that "the same value" means the same
//! underlying object, not a structural copy.
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::hash::Hash;
use std::sync::Arc;

use crate::errors::Result;

pub struct SingletonMap<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> SingletonMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        SingletonMap { cells: DashMap::new() }
    }

    /// Returns the value for `key`, constructing it via `construct` if this is the first
    /// call for that key. `construct` is never called concurrently for the same key.
    pub fn get<F>(&self, key: K, construct: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let cell = self
            .cells
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_try_init(construct).cloned()
    }

    /// All successfully constructed values currently in the map. Values whose construction
    /// is still in flight or failed are not included.
    pub fn values(&self) -> Vec<V> {
        self.cells
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    /// Discards every cell. Callers must ensure dependents have already been drained.
    pub fn clear(&self) {
        self.cells.clear();
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K, V> Default for SingletonMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn constructs_exactly_once_per_key() {
        let map: SingletonMap<&'static str, Arc<usize>> = SingletonMap::new();
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    let v = map
                        .get("k", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(Arc::new(42usize))
                        })
                        .unwrap();
                    assert_eq!(*v, 42);
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_construction_does_not_poison_key() {
        let map: SingletonMap<&'static str, Arc<usize>> = SingletonMap::new();
        let first = map.get("k", || Err(ErrorKind::Closed.into()));
        assert!(first.is_err());

        let second = map.get("k", || Ok(Arc::new(7usize)));
        assert_eq!(*second.unwrap(), 7);
    }

    #[test]
    fn values_only_includes_constructed_entries() {
        let map: SingletonMap<&'static str, Arc<usize>> = SingletonMap::new();
        map.get("a", || Ok(Arc::new(1usize))).unwrap();
        let _ = map.get("b", || Err(ErrorKind::Closed.into()));
        assert_eq!(map.values().len(), 1);
    }
}
