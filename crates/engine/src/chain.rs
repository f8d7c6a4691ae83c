//! Revision chains
//!
//! A chain is an ordered history of revisions. Three kinds exist:
//!
//! - `Physical`: atoms sharing one `ChainHead`, linked by `PrevAtom`
//! - `NewPhysical`: the chain of an artifact still being created; its only
//!   revision is the creator's pending revision until the creator is built
//! - `RcbLocal`: local view of a remote-capable artifact (open local chain if
//!   one exists, else the main chain), walked with the `RcbLocal` iterator
//!
//! # Last Revision Memo
//!
//! `last_revision()` memoizes the newest key together with the global counter
//! it was computed at. The memo is valid while its counter is not older than
//! the current counter. The atom scan runs with no lock held.

use crate::access::RevisionIterator;
use crate::artifact::Artifact;
use crate::basis::Basis;
use crate::creator::RevisionCreator;
use crate::discovery;
use crate::revision::{CommittedRevision, Revision};
use revstore_concurrency::CounterMemo;
use revstore_core::{AtomId, ChainFailure, Error, Result, SystemKey, Wcn};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What a chain is made of
pub(crate) enum ChainKind {
    Physical { head: AtomId },
    NewPhysical { head: AtomId, creator: RevisionCreator },
    RcbLocal { artifact: AtomId },
}

/// Shared chain state held by artifact impls and the chain cache
pub(crate) struct ChainInner {
    kind: ChainKind,
    memo: CounterMemo<AtomId>,
}

impl ChainInner {
    pub(crate) fn physical(head: AtomId) -> Self {
        Self::with_kind(ChainKind::Physical { head })
    }

    pub(crate) fn new_physical(head: AtomId, creator: RevisionCreator) -> Self {
        Self::with_kind(ChainKind::NewPhysical { head, creator })
    }

    pub(crate) fn rcb_local(artifact: AtomId) -> Self {
        Self::with_kind(ChainKind::RcbLocal { artifact })
    }

    fn with_kind(kind: ChainKind) -> Self {
        ChainInner {
            kind,
            memo: CounterMemo::new(),
        }
    }

    pub(crate) fn key(&self) -> AtomId {
        match &self.kind {
            ChainKind::Physical { head } | ChainKind::NewPhysical { head, .. } => *head,
            ChainKind::RcbLocal { artifact } => *artifact,
        }
    }

    pub(crate) fn iterator(&self) -> RevisionIterator {
        match &self.kind {
            ChainKind::RcbLocal { .. } => RevisionIterator::RcbLocal,
            _ => RevisionIterator::Physical,
        }
    }
}

/// Handle of a revision chain
#[derive(Clone)]
pub struct RevisionChain {
    basis: Basis,
    inner: Arc<ChainInner>,
}

impl RevisionChain {
    pub(crate) fn new(basis: Basis, inner: Arc<ChainInner>) -> Self {
        RevisionChain { basis, inner }
    }

    /// Chain key: head atom for physical chains, artifact key for local views
    pub fn key(&self) -> AtomId {
        self.inner.key()
    }

    /// Iterator used to walk this chain
    pub fn iterator(&self) -> RevisionIterator {
        self.inner.iterator()
    }

    /// Check if this is a physical chain
    pub fn is_physical(&self) -> bool {
        !matches!(self.inner.kind, ChainKind::RcbLocal { .. })
    }

    /// Artifact owning the chain
    pub fn artifact(&self) -> Result<Artifact> {
        match &self.inner.kind {
            ChainKind::Physical { head } => self.basis.artifact_by_chain_key(*head),
            ChainKind::NewPhysical { head, .. } => self.basis.artifact(*head),
            ChainKind::RcbLocal { artifact } => self.basis.artifact(*artifact),
        }
    }

    fn committed(&self, key: AtomId) -> Result<Revision> {
        self.basis.revision(key, self.iterator())
    }

    fn no_revisions(&self) -> Error {
        Error::chain(self.key(), ChainFailure::NoRevisions)
    }

    // ========================================================================
    // First and last
    // ========================================================================

    /// First revision of the chain
    pub fn first_revision(&self) -> Result<Revision> {
        match &self.inner.kind {
            ChainKind::Physical { head } => self.physical_first(*head),
            ChainKind::NewPhysical { head, creator } => match creator.built_revision() {
                Some(_) => self.physical_first(*head),
                None if creator.is_abandoned() => Err(self.no_revisions()),
                None => Ok(Revision::Pending(creator.clone())),
            },
            ChainKind::RcbLocal { .. } => {
                let mut first = None;
                for revision in self.complete_revisions()? {
                    first = Some(revision);
                }
                first.ok_or_else(|| self.no_revisions())
            }
        }
    }

    fn physical_first(&self, head: AtomId) -> Result<Revision> {
        if self.basis.universe().contains_atom(head) {
            self.committed(head)
        } else {
            Err(self.no_revisions())
        }
    }

    fn physical_last(&self, head: AtomId) -> Result<Option<Revision>> {
        let universe = self.basis.universe();
        let last = self
            .basis
            .consistency()
            .run("last atom in physical chain", || {
                discovery::last_atom_in_physical_chain(universe, head)
            })?;
        last.map(|key| self.committed(key)).transpose()
    }

    /// Newest revision, scanning atoms without the memo
    pub fn raw_last_revision(&self) -> Result<Option<Revision>> {
        match &self.inner.kind {
            ChainKind::Physical { head } => self.physical_last(*head),
            ChainKind::NewPhysical { head, creator } => match creator.built_revision() {
                Some(_) => self.physical_last(*head),
                None if creator.is_abandoned() => Ok(None),
                None => Ok(Some(Revision::Pending(creator.clone()))),
            },
            ChainKind::RcbLocal { artifact } => {
                let universe = self.basis.universe();
                let open = self.basis.consistency().run("open local chain", || {
                    discovery::open_local_chain(universe, *artifact)
                })?;
                match open {
                    Some(local) => self.committed(local.last).map(Some),
                    None => {
                        let main = self.basis.artifact(*artifact)?.chain_for_main()?;
                        Ok(main
                            .raw_last_revision()?
                            .map(|r| reiterate(r, RevisionIterator::RcbLocal)))
                    }
                }
            }
        }
    }

    /// Newest revision, or `None` for a chain with no revisions
    pub fn last_revision_or_none(&self) -> Result<Option<Revision>> {
        let current = self.basis.current_wcn();
        if let Some(key) = self.inner.memo.get(current) {
            return self.committed(key).map(Some);
        }
        let last = self.raw_last_revision()?;
        if let Some(committed) = last.as_ref().and_then(Revision::committed) {
            if !self.inner.memo.publish(current, committed.key()) {
                debug!(target: "revstore::chain", chain = %self.key(), "Newer last revision already memoized");
            }
        }
        Ok(last)
    }

    /// Newest revision
    ///
    /// # Errors
    ///
    /// `Chain { failure: NoRevisions }` if the chain is empty.
    pub fn last_revision(&self) -> Result<Revision> {
        self.last_revision_or_none()?
            .ok_or_else(|| self.no_revisions())
    }

    /// Forget the memoized last revision
    pub fn invalidate(&self) {
        self.inner.memo.invalidate();
    }

    // ========================================================================
    // Time travel
    // ========================================================================

    /// Newest revision committed strictly before `before`
    ///
    /// # Errors
    ///
    /// - `NoRevisions` if the chain is empty
    /// - `InFuture(first)` if even the first revision is not before `before`,
    ///   or is still pending
    /// - `NotFound` if the walk back ended without a match
    pub fn last_revision_before(&self, before: Wcn) -> Result<Revision> {
        let last = self.last_revision()?;
        if before.is_latest() || before > self.basis.current_wcn() {
            return Ok(last);
        }
        if let Some(found) = self.walk_before(last, before)? {
            return Ok(found);
        }
        let first = self.first_revision()?;
        // A first revision that is still pending did not exist at any bound
        let failure = if first.is_pending() || !first.wcn().is_earlier(before) {
            ChainFailure::InFuture(first.wcn())
        } else {
            ChainFailure::NotFound
        };
        Err(Error::chain(self.key(), failure))
    }

    /// Like `last_revision_before`, with every chain failure mapped to `None`
    pub fn last_revision_before_or_none(&self, before: Wcn) -> Result<Option<Revision>> {
        match self.last_revision_before(before) {
            Ok(revision) => Ok(Some(revision)),
            Err(Error::Chain { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn walk_before(&self, last: Revision, before: Wcn) -> Result<Option<Revision>> {
        let start = last.key();
        let mut visited = FxHashSet::default();
        let mut current = Some(last);
        while let Some(revision) = current {
            if !visited.insert(revision.key()) {
                return Err(Error::ChainCycle {
                    start,
                    steps: visited.len(),
                });
            }
            if !revision.is_pending() && revision.wcn().is_earlier(before) {
                return Ok(Some(revision));
            }
            current = revision.prev_revision()?;
        }
        Ok(None)
    }

    // ========================================================================
    // Membership and order
    // ========================================================================

    /// Every revision, newest first
    pub fn complete_revisions(&self) -> Result<Vec<Revision>> {
        let mut revisions = Vec::new();
        let mut visited = FxHashSet::default();
        let mut current = self.last_revision_or_none()?;
        while let Some(revision) = current {
            if !visited.insert(revision.key()) {
                return Err(Error::ChainCycle {
                    start: revisions.first().map(Revision::key).unwrap_or(revision.key()),
                    steps: visited.len(),
                });
            }
            current = revision.prev_revision()?;
            revisions.push(revision);
        }
        Ok(revisions)
    }

    /// Check if `revision` is on this chain
    pub fn contains_revision(&self, revision: &Revision) -> Result<bool> {
        match &self.inner.kind {
            ChainKind::Physical { head } | ChainKind::NewPhysical { head, .. } => {
                match revision.committed() {
                    Some(c) => Ok(c.atom()?.get_ref(SystemKey::ChainHead) == Some(*head)),
                    None => match revision {
                        Revision::Pending(creator) => {
                            Ok(creator.chain_head() == *head && !creator.is_abandoned())
                        }
                        Revision::Committed(_) => Ok(false),
                    },
                }
            }
            ChainKind::RcbLocal { .. } => Ok(self
                .complete_revisions()?
                .iter()
                .any(|r| r.key() == revision.key())),
        }
    }

    /// Revision `key` if it is on this chain
    pub fn revision_on_chain_or_none(&self, key: AtomId) -> Result<Option<Revision>> {
        match &self.inner.kind {
            ChainKind::Physical { head } => self.physical_member(*head, key),
            ChainKind::NewPhysical { head, creator } => {
                if creator.built_revision().is_none() {
                    let pending = creator.key() == key && !creator.is_abandoned();
                    return Ok(pending.then(|| Revision::Pending(creator.clone())));
                }
                self.physical_member(*head, key)
            }
            ChainKind::RcbLocal { .. } => Ok(self
                .complete_revisions()?
                .into_iter()
                .find(|r| r.key() == key)),
        }
    }

    fn physical_member(&self, head: AtomId, key: AtomId) -> Result<Option<Revision>> {
        match self.basis.universe().get_atom(key) {
            Some(atom) if atom.get_ref(SystemKey::ChainHead) == Some(head) => {
                self.committed(key).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Order of two revisions on this chain
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if either revision is not on the chain.
    pub fn revision_order(&self, a: &Revision, b: &Revision) -> Result<Ordering> {
        if a.key() == b.key() {
            return Ok(Ordering::Equal);
        }
        for revision in [a, b] {
            if !self.contains_revision(revision)? {
                return Err(Error::InvalidOperation(format!(
                    "{} is not on chain {}",
                    revision,
                    self.key()
                )));
            }
        }
        match order_wcn(a).cmp(&order_wcn(b)) {
            Ordering::Equal => {
                let earlier = discovery::is_earlier_on_chain(
                    self.basis.universe(),
                    b.key(),
                    a.key(),
                    self.iterator(),
                )?;
                Ok(if earlier { Ordering::Less } else { Ordering::Greater })
            }
            order => Ok(order),
        }
    }
}

fn order_wcn(revision: &Revision) -> Wcn {
    if revision.is_pending() {
        Wcn::LATEST
    } else {
        revision.wcn()
    }
}

/// Same revision walked with another iterator
fn reiterate(revision: Revision, iterator: RevisionIterator) -> Revision {
    match revision.committed() {
        Some(c) => Revision::Committed(CommittedRevision::with_iterator(&c, iterator)),
        None => revision,
    }
}

impl fmt::Debug for RevisionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner.kind {
            ChainKind::Physical { .. } => "physical",
            ChainKind::NewPhysical { .. } => "new",
            ChainKind::RcbLocal { .. } => "rcb-local",
        };
        write!(f, "RevisionChain({} {})", kind, self.key())
    }
}
