//! Revision creators: the mutable draft of a new revision
//!
//! A creator holds the attribute changes of one artifact inside one
//! transaction. Its state moves one way through a `StateSwitch`:
//!
//! ```text
//! Building(Draft) -> Committing(Draft) -> Built { revision, was_empty }
//!                                      \-> Abandoned   (commit failed)
//! ```
//!
//! # Diff Rules
//!
//! A change is recorded only if it differs from the inherited value (the
//! previous revision's value). Setting an attribute back to its inherited value
//! drops the pending change. For a brand new artifact every unset is a no-op.
//!
//! # Commit
//!
//! As a `CommitListener` the creator discards its atom when empty, otherwise
//! writes the pending values as junctions, reports referenced atoms and
//! registers a verifier that fails the commit if another writer appended to the
//! same chain position first. After the commit it freezes into the resulting
//! revision: its own atom, or the previous revision when it was discarded.

use crate::access::RevisionIterator;
use crate::artifact::Artifact;
use crate::basis::Basis;
use crate::discovery;
use crate::revision::{CommittedRevision, Revision};
use crate::schema::AtomMarker;
use revstore_concurrency::{Phase, StateSwitch};
use revstore_core::{AtomId, Error, Result, StoredValue, SystemKey, Value, Wcn};
use revstore_storage::{Atom, CommitListener, Expansion, Universe, Verifier};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Where the creator's atom goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CreatorKind {
    /// Artifact atom of a new artifact
    NewArtifact { remote: bool },
    /// Next revision of an existing chain
    Append,
    /// Head of a new local chain of a remote-capable artifact
    OpenLocal { expected: Option<AtomId> },
}

struct Draft {
    atom: Atom,
    pending: BTreeMap<AtomId, StoredValue>,
    forced: bool,
    closure: bool,
    discarded: bool,
}

impl Draft {
    fn stage(&mut self, attribute: AtomId, value: StoredValue, inherited: &Option<Value>) {
        let same_as_inherited = match (&value, inherited) {
            (StoredValue::Unset, None) => true,
            (StoredValue::Set(v), Some(i)) => v.is_identical(i),
            _ => false,
        };
        if same_as_inherited {
            self.pending.remove(&attribute);
        } else {
            self.pending.insert(attribute, value);
        }
    }

    fn is_empty(&self, has_prev: bool) -> bool {
        self.pending.is_empty() && !self.forced && !self.closure && has_prev
    }
}

#[derive(Clone)]
struct Built {
    revision: CommittedRevision,
    was_empty: bool,
}

pub(crate) struct CreatorShared {
    basis: Basis,
    key: AtomId,
    artifact: AtomId,
    chain: AtomId,
    iterator: RevisionIterator,
    kind: CreatorKind,
    prev: Option<CommittedRevision>,
    switch: StateSwitch<Draft, Built>,
}

/// Draft of the next revision of one artifact
#[derive(Clone)]
pub struct RevisionCreator {
    shared: Arc<CreatorShared>,
}

impl RevisionCreator {
    // ========================================================================
    // Construction
    // ========================================================================

    fn build(
        basis: &Basis,
        atom: Atom,
        artifact: AtomId,
        chain: AtomId,
        iterator: RevisionIterator,
        kind: CreatorKind,
        prev: Option<CommittedRevision>,
    ) -> Self {
        RevisionCreator {
            shared: Arc::new(CreatorShared {
                basis: basis.clone(),
                key: atom.id(),
                artifact,
                chain,
                iterator,
                kind,
                prev,
                switch: StateSwitch::new(Draft {
                    atom,
                    pending: BTreeMap::new(),
                    forced: false,
                    closure: false,
                    discarded: false,
                }),
            }),
        }
    }

    /// Creator of a new artifact's first revision
    pub(crate) fn new_artifact(basis: &Basis, atom: Atom, remote: bool) -> Result<Self> {
        let marker = if remote {
            AtomMarker::RcbArtifact
        } else {
            AtomMarker::LocalArtifact
        };
        atom.build_long(SystemKey::AtomMarker, marker.code())?;
        atom.build_ref(SystemKey::ChainHead, atom.id())?;
        let key = atom.id();
        Ok(Self::build(
            basis,
            atom,
            key,
            key,
            RevisionIterator::Physical,
            CreatorKind::NewArtifact { remote },
            None,
        ))
    }

    /// Creator appending to the chain headed by `head`
    pub(crate) fn append(
        basis: &Basis,
        atom: Atom,
        artifact: AtomId,
        head: AtomId,
        prev: CommittedRevision,
    ) -> Result<Self> {
        atom.build_long(SystemKey::AtomMarker, AtomMarker::Revision.code())?;
        atom.build_ref(SystemKey::ChainHead, head)?;
        atom.build_ref(SystemKey::PrevAtom, prev.key())?;
        let iterator = prev.iterator();
        Ok(Self::build(
            basis,
            atom,
            artifact,
            head,
            iterator,
            CreatorKind::Append,
            Some(prev),
        ))
    }

    /// Creator of a new local chain branching from `prev`
    pub(crate) fn open_local(
        basis: &Basis,
        atom: Atom,
        artifact: AtomId,
        prev: CommittedRevision,
        expected: Option<AtomId>,
    ) -> Result<Self> {
        atom.build_long(SystemKey::AtomMarker, AtomMarker::LocalChainHead.code())?;
        atom.build_ref(SystemKey::ChainHead, atom.id())?;
        atom.build_ref(SystemKey::ChainArtifact, artifact)?;
        atom.build_ref(SystemKey::CopiedFrom, prev.key())?;
        let head = atom.id();
        Ok(Self::build(
            basis,
            atom,
            artifact,
            head,
            RevisionIterator::RcbLocal,
            CreatorKind::OpenLocal { expected },
            Some(prev.with_iterator(RevisionIterator::RcbLocal)),
        ))
    }

    pub(crate) fn listener(&self) -> Arc<dyn CommitListener> {
        Arc::clone(&self.shared) as Arc<dyn CommitListener>
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Key of the atom this creator builds
    pub fn key(&self) -> AtomId {
        self.shared.key
    }

    /// Artifact being changed
    pub fn artifact(&self) -> Artifact {
        Artifact::new(self.shared.basis.clone(), self.shared.artifact)
    }

    /// Head of the physical chain the new atom joins
    pub fn chain_head(&self) -> AtomId {
        self.shared.chain
    }

    /// Owning basis
    pub fn basis(&self) -> &Basis {
        &self.shared.basis
    }

    /// Iterator of the revision being built
    pub fn iterator(&self) -> RevisionIterator {
        self.shared.iterator
    }

    /// Check if this creator makes the first revision of a new artifact
    pub fn is_new(&self) -> bool {
        self.shared.prev.is_none()
    }

    /// Revision this draft is based on
    pub fn prev_revision(&self) -> Option<Revision> {
        self.shared.prev.clone().map(Revision::Committed)
    }

    /// Key of the resulting revision: the previous one if the draft was
    /// discarded as empty, else the creator's own atom
    pub fn revision_key(&self) -> AtomId {
        match self.built_revision() {
            Some(revision) => revision.key(),
            None => self.shared.key,
        }
    }

    /// Commit counter of the result (`Wcn::EARLIEST` until built)
    pub fn wcn(&self) -> Wcn {
        self.built_revision()
            .map(|r| r.wcn())
            .unwrap_or(Wcn::EARLIEST)
    }

    pub(crate) fn kind(&self) -> CreatorKind {
        self.shared.kind
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Resulting revision once built
    pub fn built_revision(&self) -> Option<CommittedRevision> {
        self.shared.switch.result().map(|built| built.revision)
    }

    /// Check if the creator is built
    pub fn is_built(&self) -> bool {
        self.shared.switch.is_built()
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        matches!(*self.shared.switch.lock(), Phase::Abandoned)
    }

    /// Check if committing now would write nothing
    ///
    /// A built creator reports whether its commit was empty.
    pub fn is_empty(&self) -> bool {
        let has_prev = self.shared.prev.is_some();
        match &*self.shared.switch.lock() {
            Phase::Building(d) | Phase::Committing(d) => d.is_empty(has_prev),
            Phase::Built(b) => b.was_empty,
            Phase::Abandoned => true,
        }
    }

    /// Check if any attribute change is pending
    pub fn has_changes(&self) -> bool {
        self.shared
            .switch
            .lock()
            .draft()
            .is_some_and(|d| !d.pending.is_empty())
    }

    /// Check if `attribute` has a pending change
    pub fn is_changed(&self, attribute: AtomId) -> bool {
        self.shared
            .switch
            .lock()
            .draft()
            .is_some_and(|d| d.pending.contains_key(&attribute))
    }

    /// Pending change of `attribute`: `Some(None)` for a pending unset
    pub fn changing_value(&self, attribute: AtomId) -> Option<Option<Value>> {
        self.shared
            .switch
            .lock()
            .draft()
            .and_then(|d| d.pending.get(&attribute).cloned())
            .map(StoredValue::into_value)
    }

    /// Check if this creator closes a local chain
    pub fn is_closure(&self) -> bool {
        match &*self.shared.switch.lock() {
            Phase::Building(d) | Phase::Committing(d) => d.closure,
            _ => false,
        }
    }

    /// Changes of this revision: pending ones while building, the committed
    /// atom's afterwards
    pub fn changes(&self) -> Result<BTreeMap<AtomId, Option<Value>>> {
        let built = {
            let phase = self.shared.switch.lock();
            match &*phase {
                Phase::Building(d) | Phase::Committing(d) => {
                    return Ok(d
                        .pending
                        .iter()
                        .map(|(attr, v)| (*attr, v.clone().into_value()))
                        .collect())
                }
                Phase::Built(b) => b.clone(),
                Phase::Abandoned => return Ok(BTreeMap::new()),
            }
        };
        if built.was_empty {
            Ok(BTreeMap::new())
        } else {
            built.revision.changes()
        }
    }

    /// Value of `attribute` as the resulting revision will have it
    pub fn value(&self, attribute: AtomId) -> Result<Option<Value>> {
        let built = {
            let phase = self.shared.switch.lock();
            match &*phase {
                Phase::Building(d) | Phase::Committing(d) => {
                    if let Some(value) = d.pending.get(&attribute) {
                        return Ok(value.clone().into_value());
                    }
                    None
                }
                Phase::Built(b) => Some(b.revision.clone()),
                Phase::Abandoned => {
                    return Err(Error::InvalidOperation(format!(
                        "creator {} was abandoned",
                        self.shared.key
                    )))
                }
            }
        };
        match built {
            Some(revision) => revision.value(attribute),
            None => self.inherited(attribute),
        }
    }

    fn inherited(&self, attribute: AtomId) -> Result<Option<Value>> {
        match &self.shared.prev {
            Some(prev) => prev.value(attribute),
            None => Ok(None),
        }
    }

    /// Ethereal atom of the draft
    pub(crate) fn draft_atom(&self) -> Result<Atom> {
        self.shared
            .switch
            .lock()
            .draft()
            .map(|d| d.atom.clone())
            .ok_or(Error::AlreadyBuilt(self.shared.key))
    }

    /// Handle of the revision this creator builds
    pub fn as_revision(&self) -> Revision {
        Revision::Pending(self.clone())
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    fn with_building<T>(&self, f: impl FnOnce(&mut Draft) -> T) -> Result<T> {
        let mut phase = self.shared.switch.lock();
        match phase.building_mut() {
            Some(draft) => Ok(f(draft)),
            None => Err(Error::AlreadyBuilt(self.shared.key)),
        }
    }

    fn stage(&self, attribute: AtomId, value: StoredValue) -> Result<()> {
        // Read outside the lock: the inherited value may need a chain walk
        let inherited = self.inherited(attribute)?;
        self.with_building(|draft| draft.stage(attribute, value, &inherited))
    }

    /// Set `attribute` to `value`
    pub fn set_value(&self, attribute: AtomId, value: impl Into<Value>) -> Result<()> {
        self.stage(attribute, StoredValue::Set(value.into()))
    }

    /// Remove `attribute`
    pub fn unset_value(&self, attribute: AtomId) -> Result<()> {
        self.stage(attribute, StoredValue::Unset)
    }

    /// Mark the artifact deleted in this revision
    pub fn delete_object(&self) -> Result<()> {
        let deleted = self.shared.basis.schema().deleted;
        self.set_value(deleted, true)
    }

    /// Commit a revision even without changes
    pub fn force_creation(&self) -> Result<()> {
        self.with_building(|draft| draft.forced = true)
    }

    /// Make this revision close its local chain
    pub(crate) fn mark_closure(&self) -> Result<()> {
        self.with_building(|draft| {
            draft.closure = true;
            draft.forced = true;
        })
    }
}

// ============================================================================
// Commit participation
// ============================================================================

impl CreatorShared {
    fn finish(&self, committed: Option<Wcn>) {
        let Some(wcn) = committed else {
            self.switch.abandon();
            debug!(target: "revstore::creator", key = %self.key, "Creator abandoned");
            return;
        };
        let finished = self.switch.finish(|draft| match (&self.prev, draft.discarded) {
            (Some(prev), true) => Built {
                revision: prev.clone(),
                was_empty: true,
            },
            _ => Built {
                revision: CommittedRevision::new(self.basis.clone(), self.key, wcn, self.iterator),
                was_empty: false,
            },
        });
        if !finished {
            error!(target: "revstore::creator", key = %self.key, "Creator finished twice");
        }
    }
}

impl CommitListener for CreatorShared {
    fn before_commit(&self, expansion: &Expansion) -> Result<()> {
        let has_prev = self.prev.is_some();
        if !self.switch.begin_commit() {
            return Err(Error::AlreadyBuilt(self.key));
        }
        let mut phase = self.switch.lock();
        let Some(draft) = phase.draft_mut() else {
            return Err(Error::AlreadyBuilt(self.key));
        };

        if draft.is_empty(has_prev) {
            draft.discarded = true;
            debug!(target: "revstore::creator", key = %self.key, "Empty revision discarded");
            return expansion.discard_atom(self.key);
        }

        let codec = self.basis.codec();
        for (attribute, value) in &draft.pending {
            if let StoredValue::Set(v) = value {
                for referred in v.referred_keys() {
                    expansion.atom_referred(referred)?;
                }
            }
            draft.atom.build_junction(*attribute, codec.marshall(value)?)?;
        }
        if draft.closure {
            draft.atom.build_long(SystemKey::IsClosure, 1)?;
        }

        match (self.kind, &self.prev) {
            (CreatorKind::Append, Some(prev)) if !expansion.contains_atom(prev.key()) => {
                expansion.add_verifier(Box::new(ChainAppendVerifier {
                    chain: self.chain,
                    prev: prev.key(),
                }))?;
            }
            (CreatorKind::OpenLocal { expected }, _) => {
                expansion.add_verifier(Box::new(LocalBranchVerifier {
                    artifact: self.artifact,
                    expected,
                }))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn after_commit(&self, _expansion: &Expansion, committed: Option<Wcn>) {
        self.finish(committed);
    }
}

impl fmt::Debug for RevisionCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = self.shared.switch.lock();
        write!(f, "RevisionCreator({}, {})", self.shared.key, phase.name())
    }
}

// ============================================================================
// Verifiers
// ============================================================================

/// Fails the commit if another atom already follows `prev` on `chain`
struct ChainAppendVerifier {
    chain: AtomId,
    prev: AtomId,
}

impl Verifier for ChainAppendVerifier {
    fn verify(&self, universe: &Universe) -> Result<()> {
        let index = universe
            .index(SystemKey::PrevAtom)
            .ok_or_else(|| Error::inconsistent("no PrevAtom index"))?;
        for entry in index.search_all(self.prev.as_u64()) {
            let follower = universe
                .get_atom(entry.atom)
                .ok_or_else(|| Error::inconsistent(format!("indexed atom {} missing", entry.atom)))?;
            if follower.get_ref(SystemKey::ChainHead) == Some(self.chain) {
                return Err(Error::CommitConflict {
                    chain: self.chain,
                    reason: format!("{} already follows {}", entry.atom, self.prev),
                });
            }
        }
        Ok(())
    }
}

/// Fails the commit if the artifact's newest local chain changed since the
/// draft was opened
struct LocalBranchVerifier {
    artifact: AtomId,
    expected: Option<AtomId>,
}

impl Verifier for LocalBranchVerifier {
    fn verify(&self, universe: &Universe) -> Result<()> {
        let newest = discovery::newest_local_head(universe, self.artifact);
        if newest != self.expected {
            return Err(Error::CommitConflict {
                chain: self.artifact,
                reason: "local chain opened concurrently".into(),
            });
        }
        Ok(())
    }
}
