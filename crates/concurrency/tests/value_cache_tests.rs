//! Concurrent tests for the value cache and handle cache
//!
//! These tests exercise the slot protocol with real threads:
//!
//! 1. **Single flight** - racing readers of one slot trigger one load
//! 2. **Agreement** - every reader sees the sequential control value
//! 3. **Independent slots** - loads of different slots never block each other
//! 4. **Bounded handle cache** - concurrent inserts keep the cache bounded

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rand::Rng;
use revstore_concurrency::{HandleCache, ValueCache};

// ============================================================================
// Test Helpers
// ============================================================================

/// Deterministic "expensive" value for a slot
fn control_value(slot: u64) -> String {
    format!("value-{}", slot * 31 % 17)
}

// ============================================================================
// ValueCache
// ============================================================================

#[test]
fn test_racing_readers_load_once() {
    let cache: Arc<ValueCache<String>> =
        Arc::new(ValueCache::new(64, Duration::from_secs(2)));
    let loads = Arc::new(AtomicUsize::new(0));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_load(1, || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok(Some(control_value(1)))
                    })
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(control_value(1)));
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().timeouts, 0);
}

#[test]
fn test_random_access_agrees_with_control() {
    let cache: Arc<ValueCache<String>> =
        Arc::new(ValueCache::new(8, Duration::from_millis(300)));
    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                barrier.wait();
                for _ in 0..500 {
                    let slot = rng.gen_range(0..32u64);
                    let value = cache
                        .get_or_load(slot, || Ok(Some(control_value(slot))))
                        .unwrap();
                    assert_eq!(value, Some(control_value(slot)));
                    if rng.gen_bool(0.05) {
                        cache.invalidate(slot);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    // Capacity holds under churn
    assert!(cache.len() <= 8);
}

#[test]
fn test_slow_slot_does_not_block_other_slots() {
    let cache: Arc<ValueCache<u64>> = Arc::new(ValueCache::new(16, Duration::from_secs(5)));
    let barrier = Arc::new(Barrier::new(2));

    let slow = {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            cache
                .get_or_load(1, || {
                    barrier.wait();
                    thread::sleep(Duration::from_millis(200));
                    Ok(Some(1))
                })
                .unwrap()
        })
    };

    barrier.wait();
    let start = std::time::Instant::now();
    assert_eq!(cache.get_or_load(2, || Ok(Some(2))).unwrap(), Some(2));
    assert!(start.elapsed() < Duration::from_millis(150));
    assert_eq!(slow.join().unwrap(), Some(1));
}

// ============================================================================
// HandleCache
// ============================================================================

#[test]
fn test_handle_cache_stays_bounded_under_concurrent_inserts() {
    let cache: Arc<HandleCache<u64, u64>> = Arc::new(HandleCache::new(100));
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..1_000u64 {
                    let key = t * 10_000 + i;
                    let value = cache
                        .get_or_try_insert_with(key, || Ok::<_, ()>(key * 2))
                        .unwrap();
                    assert_eq!(value, key * 2);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    // Eviction runs after each insert; racing inserts may overshoot briefly
    assert!(cache.len() <= 100 + 4);
}
