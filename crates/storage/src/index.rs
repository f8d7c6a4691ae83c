//! Secondary indices over committed atoms
//!
//! One `AtomIndex` exists per indexed system key (`ChainHead`, `PrevAtom`,
//! `ChainArtifact`, `SingletonToken`). It maps the junction's numeric value to
//! the atoms carrying it.
//!
//! Entries are ordered by `(value, newest WCN first, highest atom id first)`, so
//! the first entry for a value is the most recent atom that carries it.
//!
//! - `search_exact(value)`: newest entry for exactly `value`
//! - `search_from(value)`: cursor over all entries starting at `value`; it
//!   runs into the following values once `value` is exhausted, so callers
//!   stop when the entry value changes

use parking_lot::RwLock;
use revstore_core::{AtomId, SystemKey, Wcn};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

type EntryKey = (u64, Reverse<Wcn>, Reverse<AtomId>);

/// Entries fetched per cursor refill
const CURSOR_BATCH: usize = 16;

/// One index hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Junction value
    pub value: u64,
    /// Commit counter of the atom
    pub wcn: Wcn,
    /// Atom carrying the junction
    pub atom: AtomId,
}

impl IndexEntry {
    fn from_key(key: &EntryKey) -> Self {
        IndexEntry {
            value: key.0,
            wcn: key.1 .0,
            atom: key.2 .0,
        }
    }
}

/// Secondary index: junction value → atoms
#[derive(Debug)]
pub struct AtomIndex {
    key: SystemKey,
    entries: Arc<RwLock<BTreeMap<EntryKey, ()>>>,
}

impl AtomIndex {
    /// Create an empty index over `key`
    pub fn new(key: SystemKey) -> Self {
        AtomIndex {
            key,
            entries: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// The system key this index covers
    pub fn key(&self) -> SystemKey {
        self.key
    }

    pub(crate) fn insert(&self, value: u64, wcn: Wcn, atom: AtomId) {
        self.entries
            .write()
            .insert((value, Reverse(wcn), Reverse(atom)), ());
    }

    /// Newest atom carrying exactly `value`
    pub fn search_exact(&self, value: u64) -> Option<IndexEntry> {
        let entries = self.entries.read();
        let start = (value, Reverse(Wcn::LATEST), Reverse(AtomId::new(u64::MAX)));
        entries
            .range(start..)
            .next()
            .map(|(k, _)| IndexEntry::from_key(k))
            .filter(|e| e.value == value)
    }

    /// All atoms carrying exactly `value`, newest first
    pub fn search_all(&self, value: u64) -> Vec<IndexEntry> {
        self.search_from(value)
            .take_while(|e| e.value == value)
            .collect()
    }

    /// Cursor over entries starting at `value`
    pub fn search_from(&self, value: u64) -> IndexCursor {
        IndexCursor {
            entries: Arc::clone(&self.entries),
            next_from: Bound::Included((
                value,
                Reverse(Wcn::LATEST),
                Reverse(AtomId::new(u64::MAX)),
            )),
            buffer: Vec::new(),
            exhausted: false,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Batched forward cursor over an `AtomIndex`
///
/// The index lock is held only while a batch is copied out, so entries
/// committed while the cursor is live may or may not be observed.
pub struct IndexCursor {
    entries: Arc<RwLock<BTreeMap<EntryKey, ()>>>,
    next_from: Bound<EntryKey>,
    /// Reversed batch, popped from the back
    buffer: Vec<EntryKey>,
    exhausted: bool,
}

impl IndexCursor {
    fn refill(&mut self) {
        let entries = self.entries.read();
        let batch: Vec<EntryKey> = entries
            .range((self.next_from, Bound::Unbounded))
            .take(CURSOR_BATCH)
            .map(|(k, _)| *k)
            .collect();
        drop(entries);

        if batch.len() < CURSOR_BATCH {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            self.next_from = Bound::Excluded(*last);
        }
        self.buffer = batch.into_iter().rev().collect();
    }
}

impl Iterator for IndexCursor {
    type Item = IndexEntry;

    fn next(&mut self) -> Option<IndexEntry> {
        if self.buffer.is_empty() && !self.exhausted {
            self.refill();
        }
        self.buffer.pop().map(|k| IndexEntry::from_key(&k))
    }
}
