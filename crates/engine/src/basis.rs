//! The basis: explicit context for every handle
//!
//! A `Basis` owns the universe, configuration, consistency wrapper, value
//! codec, system schema and the bounded caches of artifact, revision and chain
//! state. It is a cheap `Clone` handle; every `Artifact` and `Revision` holds
//! one.
//!
//! # Caches
//!
//! Handle caches store loaded state only. Any entry can be evicted or
//! invalidated at any time; the next access reloads it from atoms.

use crate::access::{AccessStrategy, RevisionIterator};
use crate::artifact::{Artifact, ArtifactImpl};
use crate::chain::{ChainInner, RevisionChain};
use crate::config::RevStoreConfig;
use crate::discovery;
use crate::revision::{CommittedRevision, Revision, RevisionImpl};
use crate::schema::{AtomMarker, Schema};
use crate::transaction::{Transaction, TransactionStatus};
use dashmap::DashMap;
use parking_lot::RwLock;
use revstore_concurrency::{ConsistencyWrapper, HandleCache};
use revstore_core::{AtomId, Error, Result, SystemKey, ValueCodec, Wcn};
use revstore_storage::{Atom, Universe};
use rustc_hash::FxHashMap;
use std::any::TypeId;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry counts of the basis caches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasisStats {
    /// Loaded artifact states
    pub artifacts: usize,
    /// Loaded revision states
    pub revisions: usize,
    /// Loaded physical chain states
    pub chains: usize,
    /// Artifacts created by unfinished transactions
    pub ethereal: usize,
}

struct BasisInner {
    universe: Arc<Universe>,
    config: RevStoreConfig,
    consistency: ConsistencyWrapper,
    codec: ValueCodec,
    schema: Schema,
    artifacts: HandleCache<AtomId, Arc<ArtifactImpl>>,
    revisions: HandleCache<AtomId, Arc<RevisionImpl>>,
    chains: HandleCache<AtomId, Arc<ChainInner>>,
    ethereal: DashMap<AtomId, Arc<ArtifactImpl>>,
    types: RwLock<FxHashMap<AtomId, TypeId>>,
}

/// Explicit store context
#[derive(Clone)]
pub struct Basis {
    inner: Arc<BasisInner>,
}

impl Basis {
    /// Open a basis over `universe`
    ///
    /// Validates the configuration and finds (or creates) the system
    /// attributes.
    pub fn open(universe: Arc<Universe>, config: RevStoreConfig) -> Result<Basis> {
        config.validate()?;
        let schema = Schema::bootstrap(&universe, config.read_only)?;
        info!(
            target: "revstore::basis",
            wcn = %universe.current_wcn(),
            atoms = universe.atom_count(),
            read_only = config.read_only,
            "Basis opened"
        );
        Ok(Basis {
            inner: Arc::new(BasisInner {
                consistency: ConsistencyWrapper::new(config.consistency.clone()),
                codec: ValueCodec::new(),
                schema,
                artifacts: HandleCache::new(config.artifact_cache_capacity),
                revisions: HandleCache::new(config.revision_cache_capacity),
                chains: HandleCache::new(config.artifact_cache_capacity),
                ethereal: DashMap::new(),
                types: RwLock::new(FxHashMap::default()),
                universe,
                config,
            }),
        })
    }

    /// Open a basis over a fresh universe with default settings
    pub fn in_memory() -> Result<Basis> {
        Self::open(Universe::new(), RevStoreConfig::default())
    }

    /// The atom store
    pub fn universe(&self) -> &Arc<Universe> {
        &self.inner.universe
    }

    /// Settings the basis was opened with
    pub fn config(&self) -> &RevStoreConfig {
        &self.inner.config
    }

    /// Retry policy for racing reads
    pub fn consistency(&self) -> &ConsistencyWrapper {
        &self.inner.consistency
    }

    /// Value codec
    pub fn codec(&self) -> &ValueCodec {
        &self.inner.codec
    }

    /// Keys of the system attributes
    pub fn schema(&self) -> Schema {
        self.inner.schema
    }

    /// Current global commit counter
    pub fn current_wcn(&self) -> Wcn {
        self.inner.universe.current_wcn()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Start a write transaction
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the basis is read-only.
    pub fn begin(&self) -> Result<Transaction> {
        if self.inner.config.read_only {
            return Err(Error::InvalidOperation("basis is read-only".into()));
        }
        Ok(Transaction::new(self.clone(), self.inner.universe.begin()))
    }

    /// Run `body` in a fresh transaction until it commits without a conflict
    ///
    /// `body` may commit the transaction itself; a transaction it leaves
    /// pending is committed after it returns. Conflicts are retried with the
    /// consistency backoff, up to `attempts` tries.
    pub fn repeat_until_no_collisions<T, F>(&self, attempts: usize, mut body: F) -> Result<T>
    where
        F: FnMut(&Transaction) -> Result<T>,
    {
        let attempts = attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let txn = self.begin()?;
            let outcome = body(&txn).and_then(|value| {
                if txn.status() == TransactionStatus::Pending {
                    txn.commit()?;
                }
                Ok(value)
            });
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_conflict() && attempt + 1 < attempts => {
                    debug!(target: "revstore::basis", attempt, error = %e, "Transaction collided, repeating");
                    last_error = Some(e);
                    std::thread::sleep(self.inner.consistency.config().calculate_delay(attempt));
                }
                Err(e) => {
                    if e.is_conflict() {
                        warn!(target: "revstore::basis", attempts, error = %e, "Transaction kept colliding");
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::InvalidOperation("repeat loop exited without a result".into())
        }))
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Artifact with key `key`
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `key` is not an artifact atom.
    pub fn artifact(&self, key: AtomId) -> Result<Artifact> {
        self.artifact_impl(key)?;
        Ok(Artifact::new(self.clone(), key))
    }

    /// Artifact with key `key`, or `None` if no such artifact exists
    pub fn artifact_or_none(&self, key: AtomId) -> Result<Option<Artifact>> {
        if !self.inner.ethereal.contains_key(&key) {
            match self.inner.universe.get_atom(key) {
                Some(atom) if AtomMarker::of(&atom).is_some_and(AtomMarker::is_artifact) => {}
                _ => return Ok(None),
            }
        }
        self.artifact(key).map(Some)
    }

    /// Artifact owning the physical chain headed by `head`
    pub fn artifact_by_chain_key(&self, head: AtomId) -> Result<Artifact> {
        if self.inner.ethereal.contains_key(&head) {
            return self.artifact(head);
        }
        let atom = self.committed_atom(head)?;
        match AtomMarker::of(&atom) {
            Some(marker) if marker.is_artifact() => self.artifact(head),
            Some(AtomMarker::LocalChainHead) => {
                let artifact = atom.get_ref(SystemKey::ChainArtifact).ok_or_else(|| {
                    Error::inconsistent(format!("local chain head {} has no artifact", head))
                })?;
                self.artifact(artifact)
            }
            _ => Err(Error::InvalidOperation(format!("{} is not a chain head", head))),
        }
    }

    /// Artifact a revision belongs to
    pub fn artifact_by_revision(&self, revision: &Revision) -> Result<Artifact> {
        if let Revision::Pending(creator) = revision {
            if creator.built_revision().is_none() {
                return Ok(creator.artifact());
            }
        }
        let head = discovery::physical_chain_of_atom(self, revision.key())?;
        self.artifact_by_chain_key(head)
    }

    /// Committed revision `key`, walked with `iterator`
    pub fn revision(&self, key: AtomId, iterator: RevisionIterator) -> Result<Revision> {
        let imp = self.revision_impl(key)?;
        Ok(Revision::Committed(CommittedRevision::new(
            self.clone(),
            key,
            imp.atom().wcn(),
            iterator,
        )))
    }

    /// Revision `key` seen through `strategy` of its artifact, or `None` if
    /// `key` is not a committed revision
    pub fn revision_or_none(&self, key: AtomId, strategy: AccessStrategy) -> Result<Option<Revision>> {
        if !self.inner.universe.contains_atom(key) {
            return Ok(None);
        }
        let head = discovery::physical_chain_of_atom(self, key)?;
        let artifact = self.artifact_by_chain_key(head)?;
        let remote = artifact.has_remote_extension()?;
        let iterator = RevisionIterator::for_strategy(strategy, remote);
        self.revision(key, iterator).map(Some)
    }

    /// Physical chain headed by `head`
    pub fn physical_chain(&self, head: AtomId) -> Result<RevisionChain> {
        if let Some(ethereal) = self.inner.ethereal.get(&head) {
            let artifact = Artifact::new(self.clone(), ethereal.value().key());
            drop(ethereal);
            return artifact.chain_for_main();
        }
        if !self.inner.universe.contains_atom(head) {
            return Err(Error::InvalidOperation(format!("no chain headed by {}", head)));
        }
        Ok(RevisionChain::new(self.clone(), self.chain_inner(head)))
    }

    // ========================================================================
    // Cache plumbing
    // ========================================================================

    pub(crate) fn committed_atom(&self, id: AtomId) -> Result<Atom> {
        self.inner
            .universe
            .get_atom(id)
            .ok_or_else(|| Error::inconsistent(format!("atom {} not found", id)))
    }

    pub(crate) fn artifact_impl(&self, key: AtomId) -> Result<Arc<ArtifactImpl>> {
        if let Some(ethereal) = self.inner.ethereal.get(&key) {
            return Ok(Arc::clone(ethereal.value()));
        }
        self.inner
            .artifacts
            .get_or_try_insert_with(key, || ArtifactImpl::load(self, key).map(Arc::new))
    }

    pub(crate) fn revision_impl(&self, key: AtomId) -> Result<Arc<RevisionImpl>> {
        self.inner.revisions.get_or_try_insert_with(key, || {
            self.committed_atom(key).map(|atom| Arc::new(RevisionImpl::new(atom)))
        })
    }

    pub(crate) fn chain_inner(&self, head: AtomId) -> Arc<ChainInner> {
        let loaded = self
            .inner
            .chains
            .get_or_try_insert_with::<Infallible, _>(head, || {
                Ok(Arc::new(ChainInner::physical(head)))
            });
        match loaded {
            Ok(inner) => inner,
            Err(never) => match never {},
        }
    }

    pub(crate) fn register_ethereal(&self, imp: ArtifactImpl) {
        let key = imp.key();
        self.inner.ethereal.insert(key, Arc::new(imp));
    }

    /// Drop ethereal registrations once their transaction finished
    pub(crate) fn finish_ethereal(&self, keys: &[AtomId]) {
        for key in keys {
            self.inner.ethereal.remove(key);
            self.inner.artifacts.invalidate(key);
            self.inner.chains.invalidate(key);
        }
        if !keys.is_empty() {
            debug!(target: "revstore::basis", count = keys.len(), "Ethereal artifacts released");
        }
    }

    pub(crate) fn registered_type(&self, type_artifact: AtomId) -> Option<TypeId> {
        self.inner.types.read().get(&type_artifact).copied()
    }

    pub(crate) fn register_type(&self, type_artifact: AtomId, type_id: TypeId) {
        self.inner.types.write().insert(type_artifact, type_id);
    }

    /// Entry counts of the caches
    pub fn cache_stats(&self) -> BasisStats {
        BasisStats {
            artifacts: self.inner.artifacts.len(),
            revisions: self.inner.revisions.len(),
            chains: self.inner.chains.len(),
            ethereal: self.inner.ethereal.len(),
        }
    }

    /// Drop every loaded artifact, revision and chain state
    pub fn clear_caches(&self) {
        self.inner.artifacts.clear();
        self.inner.revisions.clear();
        self.inner.chains.clear();
        debug!(target: "revstore::basis", "Caches cleared");
    }
}

impl fmt::Debug for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Basis")
            .field("wcn", &self.current_wcn())
            .field("stats", &self.cache_stats())
            .finish()
    }
}
