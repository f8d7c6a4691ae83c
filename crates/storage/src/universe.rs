//! The universe: committed atoms and the global commit counter
//!
//! All committed atoms live in a `DashMap` keyed by id. Commits are
//! serialized by a single commit lock; the counter of the last successful
//! commit (the UCN) is published only after the commit's atoms are visible in
//! the atom map and every index.
//!
//! # Commit Visibility
//!
//! A reader that observes `current_wcn() == n` is guaranteed to find every
//! atom with `wcn <= n` through `get_atom` and the indices. It may also find
//! atoms of a commit that is still publishing, with `wcn == n + 1`.

use crate::atom::Atom;
use crate::expansion::Expansion;
use crate::index::AtomIndex;
use dashmap::DashMap;
use parking_lot::Mutex;
use revstore_core::{AtomId, SystemKey, Wcn};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// System keys that have a secondary index
pub const INDEXED_KEYS: [SystemKey; 4] = [
    SystemKey::ChainHead,
    SystemKey::PrevAtom,
    SystemKey::ChainArtifact,
    SystemKey::SingletonToken,
];

/// In-memory atom store
pub struct Universe {
    atoms: DashMap<AtomId, Atom>,
    /// Next atom id to hand out (ids start at 1)
    next_atom_id: AtomicU64,
    /// Counter of the last successful commit
    ucn: AtomicU64,
    pub(crate) commit_lock: Mutex<()>,
    indices: FxHashMap<SystemKey, AtomIndex>,
}

impl Universe {
    /// Create an empty universe
    pub fn new() -> Arc<Self> {
        let indices = INDEXED_KEYS
            .iter()
            .map(|&key| (key, AtomIndex::new(key)))
            .collect();
        Arc::new(Universe {
            atoms: DashMap::new(),
            next_atom_id: AtomicU64::new(1),
            ucn: AtomicU64::new(Wcn::EARLIEST.as_u64()),
            commit_lock: Mutex::new(()),
            indices,
        })
    }

    /// Counter of the last successful commit
    #[inline]
    pub fn current_wcn(&self) -> Wcn {
        Wcn::new(self.ucn.load(Ordering::Acquire))
    }

    /// Look up a committed atom
    pub fn get_atom(&self, id: AtomId) -> Option<Atom> {
        self.atoms.get(&id).map(|entry| entry.value().clone())
    }

    /// Check if a committed atom exists
    pub fn contains_atom(&self, id: AtomId) -> bool {
        self.atoms.contains_key(&id)
    }

    /// Number of committed atoms
    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    /// Secondary index over `key`, if `key` is indexed
    pub fn index(&self, key: SystemKey) -> Option<&AtomIndex> {
        self.indices.get(&key)
    }

    /// Start a new expansion (write transaction)
    pub fn begin(self: &Arc<Self>) -> Expansion {
        Expansion::new(Arc::clone(self))
    }

    pub(crate) fn allocate_id(&self) -> AtomId {
        AtomId::new(self.next_atom_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Freeze and publish a commit's atoms. Caller holds the commit lock.
    pub(crate) fn publish(&self, atoms: &[Atom], wcn: Wcn) {
        for atom in atoms {
            atom.freeze(wcn);
            self.atoms.insert(atom.id(), atom.clone());
        }
        for atom in atoms {
            for (key, index) in &self.indices {
                if let Some(value) = atom.get_long(*key) {
                    index.insert(value, wcn, atom.id());
                }
            }
        }
        // Publish the counter last: readers rely on it to validate memos.
        self.ucn.store(wcn.as_u64(), Ordering::Release);
        trace!(target: "revstore::storage", wcn = %wcn, atoms = atoms.len(), "Published commit");
    }
}

impl std::fmt::Debug for Universe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Universe")
            .field("atoms", &self.atoms.len())
            .field("ucn", &self.current_wcn())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_universe_is_empty() {
        let universe = Universe::new();
        assert_eq!(universe.current_wcn(), Wcn::EARLIEST);
        assert_eq!(universe.atom_count(), 0);
        for key in INDEXED_KEYS {
            assert!(universe.index(key).unwrap().is_empty());
        }
        assert!(universe.index(SystemKey::AtomMarker).is_none());
    }

    #[test]
    fn test_publish_indexes_reference_junctions() {
        let universe = Universe::new();
        let atom = Atom::ethereal(universe.allocate_id());
        atom.build_ref(SystemKey::ChainHead, atom.id()).unwrap();
        atom.build_long(SystemKey::AtomMarker, 1).unwrap();

        let _lock = universe.commit_lock.lock();
        universe.publish(std::slice::from_ref(&atom), Wcn::new(1));

        assert_eq!(universe.current_wcn(), Wcn::new(1));
        assert!(universe.get_atom(atom.id()).unwrap().is_committed());
        let hit = universe
            .index(SystemKey::ChainHead)
            .unwrap()
            .search_exact(atom.id().as_u64())
            .unwrap();
        assert_eq!(hit.atom, atom.id());
        assert!(universe.index(SystemKey::PrevAtom).unwrap().is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let universe = Universe::new();
        let a = universe.allocate_id();
        let b = universe.allocate_id();
        assert_ne!(a, b);
        assert!(a.as_u64() >= 1);
    }
}
