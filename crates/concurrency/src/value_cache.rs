//! Lazy per-revision value cache with load coordination
//!
//! Each slot is in one of these states:
//!
//! | State | Meaning |
//! |-------|---------|
//! | absent | not in the map |
//! | `Loading(owner)` | claimed by `owner`, load in flight |
//! | `Loaded(Some(v))` | resolved to a value |
//! | `Loaded(None)` | resolved to "no value" |
//! | `Interrupted` | the loader panicked; waiters are told once |
//!
//! # Protocol
//!
//! 1. A thread that misses claims the slot (`Loading`), releases the lock,
//!    runs the loader, then re-locks to publish and wake waiters.
//! 2. A thread that finds the slot `Loading` waits on the condvar for at most
//!    `timeout`. On timeout it runs the loader itself and returns the result
//!    without publishing it.
//! 3. A thread that is itself loading the slot (reentrant call through the
//!    loader) fails fast with `Error::RecursiveLoad`. Reentrancy is tracked in a
//!    thread-local set of `(cache id, slot)` pairs.
//! 4. A loader that fails or panics releases its claim and wakes waiters.
//!
//! Loaded entries may be evicted or invalidated at any time; that only costs
//! a reload.

use parking_lot::{Condvar, Mutex};
use revstore_core::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Slots this thread is currently loading
    static LOADING: RefCell<FxHashSet<(u64, u64)>> = RefCell::new(FxHashSet::default());
}

enum Slot<V> {
    Loading(ThreadId),
    Loaded(Option<V>),
    Interrupted,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Served from a loaded slot
    pub hits: u64,
    /// Loaded and published by the caller
    pub misses: u64,
    /// Waits that gave up and loaded redundantly
    pub timeouts: u64,
}

/// Bounded slot cache with single-flight loading
pub struct ValueCache<V> {
    id: u64,
    capacity: usize,
    timeout: Duration,
    slots: Mutex<FxHashMap<u64, Slot<V>>>,
    loaded: Condvar,
    hits: AtomicU64,
    misses: AtomicU64,
    timeouts: AtomicU64,
}

impl<V: Clone> ValueCache<V> {
    /// Create a cache holding at most `capacity` loaded slots
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        ValueCache {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            capacity: capacity.max(1),
            timeout,
            slots: Mutex::new(FxHashMap::default()),
            loaded: Condvar::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Process-unique id of this cache
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait bound for an in-flight load
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return the slot's value, loading it with `load` on a miss
    ///
    /// # Errors
    ///
    /// - `RecursiveLoad` if this thread is already loading `slot`
    /// - `Interrupted` if the loader this call waited for panicked
    /// - whatever `load` returns
    pub fn get_or_load<F>(&self, slot: u64, load: F) -> Result<Option<V>>
    where
        F: FnOnce() -> Result<Option<V>>,
    {
        if self.is_loading_here(slot) {
            return Err(Error::RecursiveLoad {
                cache: self.id,
                slot,
            });
        }

        let mut slots = self.slots.lock();
        let deadline = Instant::now() + self.timeout;
        let mut waited = false;

        loop {
            match slots.get(&slot) {
                Some(Slot::Loaded(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value.clone());
                }
                Some(Slot::Interrupted) if waited => {
                    return Err(Error::Interrupted(format!(
                        "slot {} of cache {}",
                        slot, self.id
                    )));
                }
                Some(Slot::Loading(owner)) => {
                    let owner = *owner;
                    waited = true;
                    if self.loaded.wait_until(&mut slots, deadline).timed_out() {
                        if let Some(Slot::Loaded(value)) = slots.get(&slot) {
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            return Ok(value.clone());
                        }
                        drop(slots);
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            target: "revstore::cache",
                            cache = self.id,
                            slot,
                            owner = ?owner,
                            timeout_ms = self.timeout.as_millis() as u64,
                            "Value load wait timed out, loading redundantly"
                        );
                        let _mark = LoadingMark::new(self.id, slot);
                        return load();
                    }
                }
                None | Some(Slot::Interrupted) => {
                    slots.insert(slot, Slot::Loading(thread::current().id()));
                    break;
                }
            }
        }
        drop(slots);

        self.misses.fetch_add(1, Ordering::Relaxed);
        let claim = Claim {
            cache: self,
            slot,
            _mark: LoadingMark::new(self.id, slot),
            done: false,
        };
        let value = load()?;
        claim.publish(value.clone());
        Ok(value)
    }

    /// Loaded value of a slot, without loading
    pub fn peek(&self, slot: u64) -> Option<Option<V>> {
        match self.slots.lock().get(&slot) {
            Some(Slot::Loaded(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Drop one loaded slot
    pub fn invalidate(&self, slot: u64) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(&slot), Some(Slot::Loaded(_))) {
            slots.remove(&slot);
        }
    }

    /// Drop every loaded slot; in-flight loads are kept
    pub fn clear(&self) {
        self.slots
            .lock()
            .retain(|_, s| matches!(s, Slot::Loading(_)));
        debug!(target: "revstore::cache", cache = self.id, "Value cache cleared");
    }

    /// Number of loaded slots
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|s| matches!(s, Slot::Loaded(_)))
            .count()
    }

    /// Check if no slot is loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    fn is_loading_here(&self, slot: u64) -> bool {
        LOADING.with(|loading| loading.borrow().contains(&(self.id, slot)))
    }

    fn evict_if_needed(&self, slots: &mut FxHashMap<u64, Slot<V>>, keep: u64) {
        let loaded = slots
            .values()
            .filter(|s| matches!(s, Slot::Loaded(_)))
            .count();
        if loaded <= self.capacity {
            return;
        }
        let mut excess = loaded - self.capacity;
        slots.retain(|key, s| {
            if excess > 0 && *key != keep && matches!(s, Slot::Loaded(_)) {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

impl<V> std::fmt::Debug for ValueCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCache")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Marks `(cache, slot)` as being loaded by this thread
struct LoadingMark {
    key: (u64, u64),
}

impl LoadingMark {
    fn new(cache: u64, slot: u64) -> Self {
        LOADING.with(|loading| loading.borrow_mut().insert((cache, slot)));
        LoadingMark { key: (cache, slot) }
    }
}

impl Drop for LoadingMark {
    fn drop(&mut self) {
        LOADING.with(|loading| loading.borrow_mut().remove(&self.key));
    }
}

/// Ownership of a `Loading` slot; releases it if the loader does not publish
struct Claim<'a, V: Clone> {
    cache: &'a ValueCache<V>,
    slot: u64,
    _mark: LoadingMark,
    done: bool,
}

impl<V: Clone> Claim<'_, V> {
    fn publish(mut self, value: Option<V>) {
        let mut slots = self.cache.slots.lock();
        slots.insert(self.slot, Slot::Loaded(value));
        self.cache.evict_if_needed(&mut slots, self.slot);
        drop(slots);
        self.done = true;
        self.cache.loaded.notify_all();
    }
}

impl<V: Clone> Drop for Claim<'_, V> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut slots = self.cache.slots.lock();
        if thread::panicking() {
            slots.insert(self.slot, Slot::Interrupted);
        } else {
            slots.remove(&self.slot);
        }
        drop(slots);
        self.cache.loaded.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn cache() -> ValueCache<String> {
        ValueCache::new(16, Duration::from_millis(300))
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = cache();
        let v = cache.get_or_load(1, || Ok(Some("open".to_string()))).unwrap();
        assert_eq!(v.as_deref(), Some("open"));

        let v = cache
            .get_or_load(1, || panic!("must not reload"))
            .unwrap();
        assert_eq!(v.as_deref(), Some("open"));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, timeouts: 0 });
    }

    #[test]
    fn test_explicit_none_is_cached() {
        let cache = cache();
        assert_eq!(cache.get_or_load(2, || Ok(None)).unwrap(), None);
        assert_eq!(cache.peek(2), Some(None));
    }

    #[test]
    fn test_failed_load_releases_claim() {
        let cache = cache();
        let err = cache
            .get_or_load(3, || Err(Error::inconsistent("walk failed")))
            .unwrap_err();
        assert!(err.is_transient());
        assert!(cache.peek(3).is_none());

        let v = cache.get_or_load(3, || Ok(Some("x".into()))).unwrap();
        assert_eq!(v.as_deref(), Some("x"));
    }

    #[test]
    fn test_reentrant_load_fails_fast() {
        let cache = cache();
        let result = cache.get_or_load(4, || {
            let inner = cache.get_or_load(4, || Ok(Some("inner".into())));
            assert!(matches!(inner, Err(Error::RecursiveLoad { slot: 4, .. })));
            inner
        });
        assert!(matches!(result, Err(Error::RecursiveLoad { .. })));
        // The claim is released and the mark cleared
        assert!(cache.get_or_load(4, || Ok(None)).is_ok());
    }

    #[test]
    fn test_nested_load_of_other_slot_is_fine() {
        let cache = cache();
        let v = cache
            .get_or_load(5, || {
                let inner = cache.get_or_load(6, || Ok(Some("six".into())))?;
                Ok(inner.map(|s| format!("{}+five", s)))
            })
            .unwrap();
        assert_eq!(v.as_deref(), Some("six+five"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_eviction_keeps_capacity() {
        let cache: ValueCache<u64> = ValueCache::new(4, Duration::from_millis(10));
        for slot in 0..10 {
            cache.get_or_load(slot, || Ok(Some(slot))).unwrap();
        }
        assert_eq!(cache.len(), 4);
        // The most recently published slot survives
        assert_eq!(cache.peek(9), Some(Some(9)));
    }

    #[test]
    fn test_clear_and_invalidate() {
        let cache = cache();
        cache.get_or_load(1, || Ok(Some("a".into()))).unwrap();
        cache.get_or_load(2, || Ok(Some("b".into()))).unwrap();
        cache.invalidate(1);
        assert!(cache.peek(1).is_none());
        assert!(cache.peek(2).is_some());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_waiter_sees_published_value() {
        let cache = Arc::new(cache());
        let barrier = Arc::new(Barrier::new(2));

        let loader = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                cache
                    .get_or_load(7, || {
                        barrier.wait();
                        thread::sleep(Duration::from_millis(50));
                        Ok(Some("slow".to_string()))
                    })
                    .unwrap()
            })
        };

        barrier.wait();
        let v = cache
            .get_or_load(7, || Ok(Some("redundant".to_string())))
            .unwrap();
        assert_eq!(v.as_deref(), Some("slow"));
        assert_eq!(loader.join().unwrap().as_deref(), Some("slow"));
        assert_eq!(cache.stats().timeouts, 0);
    }

    #[test]
    fn test_waiter_loads_redundantly_after_timeout() {
        let cache: Arc<ValueCache<String>> =
            Arc::new(ValueCache::new(16, Duration::from_millis(20)));
        let barrier = Arc::new(Barrier::new(2));

        let loader = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                cache
                    .get_or_load(8, || {
                        barrier.wait();
                        thread::sleep(Duration::from_millis(300));
                        Ok(Some("slow".to_string()))
                    })
                    .unwrap()
            })
        };

        barrier.wait();
        let v = cache
            .get_or_load(8, || Ok(Some("slow".to_string())))
            .unwrap();
        assert_eq!(v.as_deref(), Some("slow"));
        assert_eq!(cache.stats().timeouts, 1);

        loader.join().unwrap();
        // The slow loader published; the redundant load did not
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.peek(8), Some(Some("slow".to_string())));
    }

    #[test]
    fn test_panicking_loader_interrupts_waiter() {
        let cache: Arc<ValueCache<String>> =
            Arc::new(ValueCache::new(16, Duration::from_secs(5)));
        let barrier = Arc::new(Barrier::new(2));

        let loader = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let _ = cache.get_or_load(9, || -> Result<Option<String>> {
                    barrier.wait();
                    thread::sleep(Duration::from_millis(50));
                    panic!("loader blew up");
                });
            })
        };

        barrier.wait();
        let result = cache.get_or_load(9, || Ok(Some("never".to_string())));
        assert!(matches!(result, Err(Error::Interrupted(_))));
        assert!(loader.join().is_err());

        // A fresh request reloads
        let v = cache.get_or_load(9, || Ok(Some("again".to_string()))).unwrap();
        assert_eq!(v.as_deref(), Some("again"));
    }
}
