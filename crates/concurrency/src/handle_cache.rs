//! Bounded cache of handle state keyed by numeric id
//!
//! Handles (artifacts, revisions, chains) are cheap ids; their loaded state
//! lives here and may be evicted at any time. Eviction drops the least
//! recently used eighth of the entries once the cache grows past capacity.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

struct Entry<V> {
    value: V,
    last_used: AtomicU64,
}

/// Concurrent LRU-ish cache
pub struct HandleCache<K, V> {
    capacity: usize,
    clock: AtomicU64,
    map: DashMap<K, Entry<V>>,
}

impl<K, V> HandleCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding about `capacity` entries
    pub fn new(capacity: usize) -> Self {
        HandleCache {
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            map: DashMap::new(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Cached value for `key`
    pub fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).map(|entry| {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            entry.value.clone()
        })
    }

    /// Insert or replace
    pub fn insert(&self, key: K, value: V) {
        self.map.insert(
            key,
            Entry {
                value,
                last_used: AtomicU64::new(self.tick()),
            },
        );
        self.evict_if_needed();
    }

    /// Cached value, or the result of `load` which is then cached
    ///
    /// Two threads missing at once may both load; the first insert wins and
    /// both receive the winning value.
    pub fn get_or_try_insert_with<E, F>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let loaded = load()?;
        let value = self
            .map
            .entry(key)
            .or_insert_with(|| Entry {
                value: loaded,
                last_used: AtomicU64::new(self.tick()),
            })
            .value
            .clone();
        self.evict_if_needed();
        Ok(value)
    }

    /// Drop one entry
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, entry)| entry.value)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.map.clear();
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_if_needed(&self) {
        let len = self.map.len();
        if len <= self.capacity {
            return;
        }
        let mut ages: Vec<(u64, K)> = self
            .map
            .iter()
            .map(|e| (e.last_used.load(Ordering::Relaxed), e.key().clone()))
            .collect();
        ages.sort_unstable_by_key(|(age, _)| *age);
        let target = len - self.capacity + self.capacity / 8;
        for (_, key) in ages.into_iter().take(target) {
            self.map.remove(&key);
        }
    }
}

impl<K, V> std::fmt::Debug for HandleCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleCache")
            .field("capacity", &self.capacity)
            .field("len", &self.map.len())
            .finish()
    }
}
