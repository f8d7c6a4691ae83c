//! Integration tests for the atom substrate
//!
//! These tests verify the universe works correctly as a complete system:
//! - Commit counter monotonicity under concurrent commits
//! - Index visibility once the counter is published
//! - Verifiers observing a stable committed state
//! - Index ordering invariants (property tests)

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use proptest::prelude::*;
use revstore_core::{AtomId, Error, Result, SystemKey, Wcn};
use revstore_storage::{Universe, Verifier};

// ============================================================================
// Helper Functions
// ============================================================================

/// Commit a single chain-head atom and return (atom, wcn)
fn commit_head(universe: &Arc<Universe>) -> (AtomId, Wcn) {
    let exp = universe.begin();
    let atom = exp.create_atom().unwrap();
    atom.build_ref(SystemKey::ChainHead, atom.id()).unwrap();
    let wcn = exp.commit().unwrap();
    (atom.id(), wcn)
}

/// Rejects the commit if any atom already follows `prev`
struct NoSuccessor {
    prev: AtomId,
}

impl Verifier for NoSuccessor {
    fn verify(&self, universe: &Universe) -> Result<()> {
        let index = universe
            .index(SystemKey::PrevAtom)
            .ok_or_else(|| Error::InvalidOperation("no prev index".into()))?;
        match index.search_exact(self.prev.as_u64()) {
            Some(hit) => Err(Error::CommitConflict {
                chain: self.prev,
                reason: format!("{} already follows", hit.atom),
            }),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Commit Ordering
// ============================================================================

#[test]
fn test_concurrent_commits_get_distinct_increasing_wcns() {
    let universe = Universe::new();
    let threads = 8;
    let per_thread = 50;
    let barrier = Arc::new(Barrier::new(threads));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let universe = Arc::clone(&universe);
            let barrier = Arc::clone(&barrier);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                barrier.wait();
                let mut local = Vec::with_capacity(per_thread);
                for _ in 0..per_thread {
                    let (_, wcn) = commit_head(&universe);
                    local.push(wcn);
                }
                // Each thread observes its own commits in increasing order
                assert!(local.windows(2).all(|w| w[0] < w[1]));
                seen.lock().extend(local);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let seen = seen.lock();
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), threads * per_thread);
    assert_eq!(universe.current_wcn(), Wcn::new((threads * per_thread) as u64));
}

#[test]
fn test_published_counter_implies_visible_atoms() {
    let universe = Universe::new();
    let writer = {
        let universe = Arc::clone(&universe);
        thread::spawn(move || {
            for _ in 0..200 {
                commit_head(&universe);
            }
        })
    };

    // Every atom at or below the observed counter must be indexed
    for _ in 0..200 {
        let wcn = universe.current_wcn();
        let index = universe.index(SystemKey::ChainHead).unwrap();
        let visible = index
            .search_from(0)
            .filter(|e| e.wcn <= wcn)
            .count();
        assert!(visible as u64 >= wcn.as_u64());
    }
    writer.join().unwrap();
}

// ============================================================================
// Verifiers
// ============================================================================

#[test]
fn test_second_append_after_same_prev_is_rejected() {
    let universe = Universe::new();
    let (head, _) = commit_head(&universe);

    let first = universe.begin();
    let second = universe.begin();
    for exp in [&first, &second] {
        let atom = exp.create_atom().unwrap();
        atom.build_ref(SystemKey::ChainHead, head).unwrap();
        atom.build_ref(SystemKey::PrevAtom, head).unwrap();
        exp.add_verifier(Box::new(NoSuccessor { prev: head })).unwrap();
    }

    assert!(first.commit().is_ok());
    let err = second.commit().unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(universe.index(SystemKey::PrevAtom).unwrap().len(), 1);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_search_exact_finds_latest_claimant(heads in prop::collection::vec(0usize..4, 1..40)) {
        let universe = Universe::new();
        let roots: Vec<AtomId> = (0..4).map(|_| commit_head(&universe).0).collect();
        let mut latest = roots.clone();

        for &h in &heads {
            let exp = universe.begin();
            let atom = exp.create_atom().unwrap();
            atom.build_ref(SystemKey::ChainHead, roots[h]).unwrap();
            exp.commit().unwrap();
            latest[h] = atom.id();
        }

        let index = universe.index(SystemKey::ChainHead).unwrap();
        for (root, expected) in roots.iter().zip(&latest) {
            let hit = index.search_exact(root.as_u64()).unwrap();
            prop_assert_eq!(hit.atom, *expected);
        }
    }

    #[test]
    fn prop_cursor_is_sorted(values in prop::collection::vec(1u64..20, 1..60)) {
        let universe = Universe::new();
        for v in &values {
            let exp = universe.begin();
            let atom = exp.create_atom().unwrap();
            atom.build_long(SystemKey::SingletonToken, *v).unwrap();
            exp.commit().unwrap();
        }

        let entries: Vec<_> = universe
            .index(SystemKey::SingletonToken)
            .unwrap()
            .search_from(0)
            .collect();
        prop_assert_eq!(entries.len(), values.len());
        for pair in entries.windows(2) {
            let ordered = pair[0].value < pair[1].value
                || (pair[0].value == pair[1].value && pair[0].wcn > pair[1].wcn);
            prop_assert!(ordered);
        }
    }
}
