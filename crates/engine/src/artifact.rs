//! Artifacts: long-lived objects with a revision history
//!
//! `Artifact` is a cheap value handle `{ basis, key }`. Its chains live in an
//! `ArtifactImpl` held by the basis's bounded artifact cache and rebuilt from
//! atoms after eviction. Artifacts created by a transaction that has not
//! finished are ethereal: their impl is registered with the basis and holds
//! the creator's pending revision.

use crate::access::AccessStrategy;
use crate::basis::Basis;
use crate::chain::{ChainInner, RevisionChain};
use crate::creator::RevisionCreator;
use crate::revision::Revision;
use crate::schema::AtomMarker;
use revstore_core::{AtomId, Error, Result, Value, Wcn};
use std::fmt;
use std::sync::Arc;

/// Loaded chain state of an artifact
pub(crate) struct ArtifactImpl {
    key: AtomId,
    remote: bool,
    main: Arc<ChainInner>,
    local: Option<Arc<ChainInner>>,
}

impl ArtifactImpl {
    /// Rebuild the impl of a committed artifact from its artifact atom
    pub(crate) fn load(basis: &Basis, key: AtomId) -> Result<Self> {
        let atom = basis
            .universe()
            .get_atom(key)
            .ok_or_else(|| Error::InvalidOperation(format!("no artifact {}", key)))?;
        let marker = AtomMarker::of(&atom)
            .filter(|m| m.is_artifact())
            .ok_or_else(|| Error::InvalidOperation(format!("{} is not an artifact", key)))?;
        let remote = marker == AtomMarker::RcbArtifact;
        Ok(ArtifactImpl {
            key,
            remote,
            main: basis.chain_inner(key),
            local: remote.then(|| Arc::new(ChainInner::rcb_local(key))),
        })
    }

    /// Impl of an artifact whose creation is still pending
    pub(crate) fn ethereal(key: AtomId, remote: bool, creator: RevisionCreator) -> Self {
        ArtifactImpl {
            key,
            remote,
            main: Arc::new(ChainInner::new_physical(key, creator)),
            local: remote.then(|| Arc::new(ChainInner::rcb_local(key))),
        }
    }

    pub(crate) fn key(&self) -> AtomId {
        self.key
    }

    pub(crate) fn is_remote(&self) -> bool {
        self.remote
    }

    fn chain_inner(&self, strategy: AccessStrategy) -> Result<Arc<ChainInner>> {
        match (strategy, &self.local) {
            (AccessStrategy::Local, Some(local)) => Ok(Arc::clone(local)),
            (AccessStrategy::Local, None) | (AccessStrategy::MainChain, Some(_)) => {
                Ok(Arc::clone(&self.main))
            }
            (AccessStrategy::MainChain, None) => Err(Error::UnsupportedStrategy {
                artifact: self.key,
                strategy: strategy.name(),
            }),
        }
    }
}

/// Handle of an artifact
#[derive(Clone)]
pub struct Artifact {
    basis: Basis,
    key: AtomId,
}

impl Artifact {
    pub(crate) fn new(basis: Basis, key: AtomId) -> Self {
        Artifact { basis, key }
    }

    /// Artifact key (id of its artifact atom)
    pub fn key(&self) -> AtomId {
        self.key
    }

    /// Owning basis
    pub fn basis(&self) -> &Basis {
        &self.basis
    }

    fn imp(&self) -> Result<Arc<ArtifactImpl>> {
        self.basis.artifact_impl(self.key)
    }

    /// Check if the artifact has a main chain besides its local edits
    pub fn has_remote_extension(&self) -> Result<bool> {
        Ok(self.imp()?.is_remote())
    }

    /// Check if `chain(strategy)` would succeed
    pub fn is_access_strategy_supported(&self, strategy: AccessStrategy) -> Result<bool> {
        Ok(match strategy {
            AccessStrategy::Local => true,
            AccessStrategy::MainChain => self.has_remote_extension()?,
        })
    }

    /// Chain view for `strategy`
    ///
    /// # Errors
    ///
    /// `UnsupportedStrategy` when asking an ordinary artifact for its main chain.
    pub fn chain(&self, strategy: AccessStrategy) -> Result<RevisionChain> {
        let inner = self.imp()?.chain_inner(strategy)?;
        Ok(RevisionChain::new(self.basis.clone(), inner))
    }

    /// Chain view of the default strategy
    pub fn default_chain(&self) -> Result<RevisionChain> {
        self.chain(AccessStrategy::DEFAULT)
    }

    /// Physical chain headed by the artifact atom
    pub(crate) fn chain_for_main(&self) -> Result<RevisionChain> {
        let inner = Arc::clone(&self.imp()?.main);
        Ok(RevisionChain::new(self.basis.clone(), inner))
    }

    /// The artifact's first revision (its artifact atom)
    pub fn first_revision(&self) -> Result<Revision> {
        self.chain_for_main()?.first_revision()
    }

    /// Newest revision under the default strategy
    pub fn last_revision(&self) -> Result<Revision> {
        self.default_chain()?.last_revision()
    }

    /// Newest revision committed strictly before `before`
    pub fn last_revision_at(&self, before: Wcn, strategy: AccessStrategy) -> Result<Revision> {
        self.chain(strategy)?.last_revision_before(before)
    }

    /// Like `last_revision_at`, with chain failures mapped to `None`
    pub fn last_revision_or_none(
        &self,
        before: Wcn,
        strategy: AccessStrategy,
    ) -> Result<Option<Revision>> {
        self.chain(strategy)?.last_revision_before_or_none(before)
    }

    /// Revision `key` of this artifact, seen through `strategy`
    pub fn revision(&self, key: AtomId, strategy: AccessStrategy) -> Result<Option<Revision>> {
        self.chain(strategy)?.revision_on_chain_or_none(key)
    }

    /// Check if `revision` belongs to this artifact on any of its chains
    pub fn contains_revision(&self, revision: &Revision) -> Result<bool> {
        if let Revision::Pending(creator) = revision {
            if creator.built_revision().is_none() {
                return Ok(creator.artifact().key() == self.key);
            }
        }
        Ok(self.basis.artifact_by_revision(revision)?.key() == self.key)
    }

    /// Commit counter of the artifact's creation
    pub fn wcn(&self) -> Result<Wcn> {
        Ok(self.first_revision()?.wcn())
    }

    /// Value of `attribute` at the newest revision
    pub fn value(&self, attribute: AtomId) -> Result<Option<Value>> {
        self.last_revision()?.value(attribute)
    }

    /// Check if the newest revision marks the artifact deleted
    pub fn is_deleted(&self) -> Result<bool> {
        let deleted = self.basis.schema().deleted;
        Ok(self.value(deleted)? == Some(Value::Bool(true)))
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Artifact {}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Artifact({})", self.key)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact{}", self.key)
    }
}
