//! Access strategies and revision iterators
//!
//! An access strategy selects which chain view of an artifact a reader sees.
//! A revision iterator is the matching rule for stepping back from one atom to
//! the previous one; it is a tagged enum dispatched by `prev_atom`.

use revstore_core::{AtomId, SystemKey};
use revstore_storage::Atom;
use std::fmt;

/// Chain view of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessStrategy {
    /// Local edits (for remote-capable artifacts: open local chain, else main chain)
    #[default]
    Local,
    /// Main chain of a remote-capable artifact
    MainChain,
}

impl AccessStrategy {
    /// The default strategy
    pub const DEFAULT: AccessStrategy = AccessStrategy::Local;

    /// Strategy name
    pub const fn name(&self) -> &'static str {
        match self {
            AccessStrategy::Local => "local",
            AccessStrategy::MainChain => "mainchain",
        }
    }
}

impl fmt::Display for AccessStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How to step back from an atom to its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevisionIterator {
    /// Follow `PrevAtom` only
    Physical,
    /// Follow `PrevAtom`, then cross from a local chain head to the main chain
    /// through `CopiedFrom`
    RcbLocal,
}

impl RevisionIterator {
    /// Number of iterator kinds
    pub const COUNT: usize = 2;

    /// Previous atom of `atom` under this iterator
    pub fn prev_atom(&self, atom: &Atom) -> Option<AtomId> {
        match self {
            RevisionIterator::Physical => atom.get_ref(SystemKey::PrevAtom),
            RevisionIterator::RcbLocal => atom
                .get_ref(SystemKey::PrevAtom)
                .or_else(|| atom.get_ref(SystemKey::CopiedFrom)),
        }
    }

    /// Iterator used by `strategy` on an artifact
    pub fn for_strategy(strategy: AccessStrategy, remote_capable: bool) -> Self {
        match (strategy, remote_capable) {
            (AccessStrategy::Local, true) => RevisionIterator::RcbLocal,
            _ => RevisionIterator::Physical,
        }
    }

    /// Dense index, for per-iterator tables
    pub(crate) const fn slot(&self) -> usize {
        match self {
            RevisionIterator::Physical => 0,
            RevisionIterator::RcbLocal => 1,
        }
    }
}
