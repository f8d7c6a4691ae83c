//! Revisions: immutable snapshots of an artifact
//!
//! A `Revision` handle is either committed (a thin `{basis, key, wcn,
//! iterator}` value) or pending (the handle of a `RevisionCreator`, which
//! forwards to the committed result once the creator is built).
//!
//! # Value Resolution
//!
//! `value(attribute)` consults the revision's `ValueCache` for the handle's
//! iterator. On a miss, the loader looks at the revision's own atom, then walks
//! previous atoms with the iterator until the attribute is found or the chain
//! ends. Revisiting an atom during the walk is a hard fault (`ChainCycle`).
//!
//! Loaded state (atom handle, value caches) lives in a `RevisionImpl` held by
//! the basis's bounded revision cache.

use crate::access::RevisionIterator;
use crate::artifact::Artifact;
use crate::basis::Basis;
use crate::chain::RevisionChain;
use crate::creator::RevisionCreator;
use crate::discovery;
use parking_lot::RwLock;
use revstore_concurrency::ValueCache;
use revstore_core::{AtomId, Error, JunctionKey, Result, SystemKey, Value, Wcn};
use revstore_storage::Atom;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// RevisionImpl
// ============================================================================

type SharedValueCache = Arc<ValueCache<Value>>;

/// Loaded state of a committed revision
pub(crate) struct RevisionImpl {
    atom: Atom,
    caches: RwLock<[Option<SharedValueCache>; RevisionIterator::COUNT]>,
}

impl RevisionImpl {
    pub(crate) fn new(atom: Atom) -> Self {
        RevisionImpl {
            atom,
            caches: RwLock::new([None, None]),
        }
    }

    pub(crate) fn atom(&self) -> &Atom {
        &self.atom
    }

    fn value_cache(&self, iterator: RevisionIterator, basis: &Basis) -> SharedValueCache {
        let slot = iterator.slot();
        if let Some(cache) = &self.caches.read()[slot] {
            return Arc::clone(cache);
        }
        let mut caches = self.caches.write();
        let cache = caches[slot].get_or_insert_with(|| {
            let config = basis.config();
            Arc::new(ValueCache::new(
                config.value_cache_capacity,
                config.value_load_timeout(),
            ))
        });
        Arc::clone(cache)
    }

    /// Drop every value cache of this revision
    pub(crate) fn drop_value_caches(&self) {
        *self.caches.write() = [None, None];
    }
}

// ============================================================================
// Atom walks
// ============================================================================

/// Walk from `start` back through previous atoms, calling `visit` on each
/// until it returns `false` or the chain ends.
pub(crate) fn walk_atoms<F>(
    basis: &Basis,
    start: &Atom,
    iterator: RevisionIterator,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(&Atom) -> Result<bool>,
{
    let mut visited = FxHashSet::default();
    let mut atom = start.clone();
    loop {
        if !visited.insert(atom.id()) {
            return Err(Error::ChainCycle {
                start: start.id(),
                steps: visited.len(),
            });
        }
        if !visit(&atom)? {
            return Ok(());
        }
        match iterator.prev_atom(&atom) {
            Some(prev) => atom = basis.committed_atom(prev)?,
            None => return Ok(()),
        }
    }
}

fn resolve_value(
    basis: &Basis,
    start: &Atom,
    iterator: RevisionIterator,
    attribute: AtomId,
) -> Result<Option<Value>> {
    let key = JunctionKey::Attribute(attribute);
    let mut found = None;
    walk_atoms(basis, start, iterator, |atom| match atom.get(key) {
        Some(particle) => {
            found = basis.codec().extract(&particle)?;
            Ok(false)
        }
        None => Ok(true),
    })?;
    Ok(found)
}

fn direct_changes(basis: &Basis, atom: &Atom) -> Result<BTreeMap<AtomId, Option<Value>>> {
    atom.copy_junctions()
        .into_iter()
        .filter_map(|(key, particle)| key.attribute().map(|attr| (attr, particle)))
        .map(|(attr, particle)| Ok((attr, basis.codec().extract(&particle)?)))
        .collect()
}

// ============================================================================
// CommittedRevision
// ============================================================================

/// Handle of a committed revision
#[derive(Clone)]
pub struct CommittedRevision {
    basis: Basis,
    key: AtomId,
    wcn: Wcn,
    iterator: RevisionIterator,
}

impl CommittedRevision {
    pub(crate) fn new(basis: Basis, key: AtomId, wcn: Wcn, iterator: RevisionIterator) -> Self {
        CommittedRevision {
            basis,
            key,
            wcn,
            iterator,
        }
    }

    /// Revision key (id of its atom)
    pub fn key(&self) -> AtomId {
        self.key
    }

    /// Commit counter of the revision
    pub fn wcn(&self) -> Wcn {
        self.wcn
    }

    /// Iterator used to walk back from this revision
    pub fn iterator(&self) -> RevisionIterator {
        self.iterator
    }

    /// Owning basis
    pub fn basis(&self) -> &Basis {
        &self.basis
    }

    /// Backing atom
    pub fn atom(&self) -> Result<Atom> {
        Ok(self.basis.revision_impl(self.key)?.atom().clone())
    }

    /// Same revision seen through another iterator
    pub fn with_iterator(&self, iterator: RevisionIterator) -> CommittedRevision {
        CommittedRevision {
            iterator,
            ..self.clone()
        }
    }

    /// Resolved value of `attribute`
    pub fn value(&self, attribute: AtomId) -> Result<Option<Value>> {
        let imp = self.basis.revision_impl(self.key)?;
        let cache = imp.value_cache(self.iterator, &self.basis);
        cache.get_or_load(attribute.as_u64(), || {
            resolve_value(&self.basis, imp.atom(), self.iterator, attribute)
        })
    }

    /// Previous revision under this handle's iterator
    pub fn prev_revision(&self) -> Result<Option<CommittedRevision>> {
        let atom = self.atom()?;
        match self.iterator.prev_atom(&atom) {
            Some(prev) => {
                let prev_atom = self.basis.committed_atom(prev)?;
                Ok(Some(CommittedRevision::new(
                    self.basis.clone(),
                    prev,
                    prev_atom.wcn(),
                    self.iterator,
                )))
            }
            None => Ok(None),
        }
    }

    /// Attribute changes made by this revision alone
    pub fn changes(&self) -> Result<BTreeMap<AtomId, Option<Value>>> {
        direct_changes(&self.basis, &self.atom()?)
    }

    /// Every attribute that resolves to a value at this revision
    pub fn values(&self) -> Result<BTreeMap<AtomId, Value>> {
        let mut seen: BTreeMap<AtomId, Option<Value>> = BTreeMap::new();
        walk_atoms(&self.basis, &self.atom()?, self.iterator, |atom| {
            for (attr, particle) in atom
                .copy_junctions()
                .into_iter()
                .filter_map(|(key, p)| key.attribute().map(|a| (a, p)))
            {
                if !seen.contains_key(&attr) {
                    seen.insert(attr, self.basis.codec().extract(&particle)?);
                }
            }
            Ok(true)
        })?;
        Ok(seen
            .into_iter()
            .filter_map(|(attr, value)| value.map(|v| (attr, v)))
            .collect())
    }

    /// Check if this revision closed a local chain
    pub fn is_closure(&self) -> Result<bool> {
        Ok(self.atom()?.has(SystemKey::IsClosure))
    }
}

// ============================================================================
// Revision
// ============================================================================

/// Immutable snapshot of an artifact, or the revision a creator will become
#[derive(Clone)]
pub enum Revision {
    /// Committed revision
    Committed(CommittedRevision),
    /// Revision being built by a creator
    Pending(RevisionCreator),
}

impl Revision {
    /// The committed revision this handle stands for, if any
    pub fn committed(&self) -> Option<CommittedRevision> {
        match self {
            Revision::Committed(c) => Some(c.clone()),
            Revision::Pending(creator) => creator.built_revision(),
        }
    }

    /// Check if the handle still stands for an unbuilt creator
    pub fn is_pending(&self) -> bool {
        self.committed().is_none()
    }

    /// Owning basis
    pub fn basis(&self) -> &Basis {
        match self {
            Revision::Committed(c) => c.basis(),
            Revision::Pending(creator) => creator.basis(),
        }
    }

    /// Revision key
    ///
    /// A creator that committed empty stands for its previous revision and
    /// reports that revision's key.
    pub fn key(&self) -> AtomId {
        match self {
            Revision::Committed(c) => c.key(),
            Revision::Pending(creator) => creator.revision_key(),
        }
    }

    /// Commit counter (`Wcn::EARLIEST` while pending)
    pub fn wcn(&self) -> Wcn {
        match self {
            Revision::Committed(c) => c.wcn(),
            Revision::Pending(creator) => creator.wcn(),
        }
    }

    /// Iterator used to walk back from this revision
    pub fn iterator(&self) -> RevisionIterator {
        match self {
            Revision::Committed(c) => c.iterator(),
            Revision::Pending(creator) => creator.iterator(),
        }
    }

    /// Resolved value of `attribute`
    pub fn value(&self, attribute: AtomId) -> Result<Option<Value>> {
        match self {
            Revision::Committed(c) => c.value(attribute),
            Revision::Pending(creator) => creator.value(attribute),
        }
    }

    /// Previous revision, following this revision's iterator
    pub fn prev_revision(&self) -> Result<Option<Revision>> {
        match self.committed() {
            Some(c) => Ok(c.prev_revision()?.map(Revision::Committed)),
            None => match self {
                Revision::Pending(creator) => Ok(creator.prev_revision()),
                Revision::Committed(_) => Ok(None),
            },
        }
    }

    /// Attribute changes made by this revision alone
    pub fn changes(&self) -> Result<BTreeMap<AtomId, Option<Value>>> {
        match self {
            Revision::Committed(c) => c.changes(),
            Revision::Pending(creator) => creator.changes(),
        }
    }

    /// Every attribute that resolves to a value at this revision
    pub fn values(&self) -> Result<BTreeMap<AtomId, Value>> {
        if let Some(c) = self.committed() {
            return c.values();
        }
        let Revision::Pending(creator) = self else {
            return Ok(BTreeMap::new());
        };
        let mut values = match creator.prev_revision() {
            Some(prev) => prev.values()?,
            None => BTreeMap::new(),
        };
        for (attr, value) in creator.changes()? {
            match value {
                Some(v) => values.insert(attr, v),
                None => values.remove(&attr),
            };
        }
        Ok(values)
    }

    /// Backing atom (ethereal while pending)
    pub fn atom(&self) -> Result<Atom> {
        if let Some(c) = self.committed() {
            return c.atom();
        }
        match self {
            Revision::Pending(creator) => creator.draft_atom(),
            Revision::Committed(c) => c.atom(),
        }
    }

    /// Artifact this revision belongs to
    pub fn artifact(&self) -> Result<Artifact> {
        match self {
            Revision::Pending(creator) if creator.built_revision().is_none() => {
                Ok(creator.artifact())
            }
            _ => self.basis().artifact_by_revision(self),
        }
    }

    /// Physical chain holding this revision
    pub fn chain(&self) -> Result<RevisionChain> {
        discovery::physical_chain_of_revision(self)
    }

    /// Check if this revision closed a local chain
    pub fn is_closure(&self) -> Result<bool> {
        match self.committed() {
            Some(c) => c.is_closure(),
            None => match self {
                Revision::Pending(creator) => Ok(creator.is_closure()),
                Revision::Committed(c) => c.is_closure(),
            },
        }
    }

    /// Drop loaded values of this revision
    pub fn drop_caches(&self) -> Result<()> {
        if let Some(c) = self.committed() {
            c.basis().revision_impl(c.key())?.drop_value_caches();
        }
        Ok(())
    }
}

impl From<CommittedRevision> for Revision {
    fn from(c: CommittedRevision) -> Self {
        Revision::Committed(c)
    }
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Revision {}

impl PartialEq for CommittedRevision {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CommittedRevision {}

impl fmt::Debug for CommittedRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({}@{})", self.key, self.wcn)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Committed(c) => fmt::Debug::fmt(c, f),
            Revision::Pending(creator) => match creator.built_revision() {
                Some(c) => fmt::Debug::fmt(&c, f),
                None => write!(f, "Revision({}, pending)", creator.key()),
            },
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rev{}@{}", self.key(), self.wcn())
    }
}
