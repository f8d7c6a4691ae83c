//! Transactions: groups of revision creators committed together
//!
//! A transaction wraps one storage `Expansion`. It hands out at most one
//! creator per artifact, registers every creator as a commit listener and
//! tracks the artifacts it created so the basis can treat them as ethereal
//! until the transaction finishes.
//!
//! # Lifecycle
//!
//! ```text
//! Pending -> Committing -> Committed(wcn) | CommitError
//! Pending -> RolledBack
//! ```
//!
//! Dropping a pending transaction rolls it back.

use crate::access::AccessStrategy;
use crate::artifact::{Artifact, ArtifactImpl};
use crate::basis::Basis;
use crate::creator::{CreatorKind, RevisionCreator};
use crate::discovery;
use crate::revision::{CommittedRevision, Revision};
use parking_lot::Mutex;
use revstore_core::{AtomId, Error, Result, SystemKey, Wcn};
use revstore_storage::{Atom, Expansion};
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting changes
    Pending,
    /// Commit in progress
    Committing,
    /// Committed at this counter (the unchanged counter for an empty commit)
    Committed(Wcn),
    /// Commit failed; nothing was published
    CommitError,
    /// Rolled back; nothing was published
    RolledBack,
}

struct ChangeEntry {
    creator: RevisionCreator,
    strategy: AccessStrategy,
    base: Option<AtomId>,
}

/// Chain a new creator appends to
enum Target {
    Append { head: AtomId },
    OpenLocal { expected: Option<AtomId> },
}

struct TxnState {
    status: TransactionStatus,
    changes: FxHashMap<AtomId, ChangeEntry>,
    order: Vec<AtomId>,
    ethereal: Vec<AtomId>,
    forced: bool,
}

impl ChangeEntry {
    /// The creator already handed out for an artifact, if the request matches it
    fn reuse(
        &self,
        artifact: &Artifact,
        strategy: AccessStrategy,
        base: Option<AtomId>,
    ) -> Result<RevisionCreator> {
        let same = self.strategy == strategy && self.base == base;
        if same || (self.creator.is_new() && base.is_none()) {
            return Ok(self.creator.clone());
        }
        Err(Error::InvalidOperation(format!(
            "{} is already changed with strategy {} and base {:?}",
            artifact, self.strategy, self.base
        )))
    }
}

impl TxnState {
    fn ensure_pending(&self) -> Result<()> {
        match self.status {
            TransactionStatus::Pending => Ok(()),
            other => Err(Error::InvalidOperation(format!(
                "transaction is {:?}",
                other
            ))),
        }
    }

    fn insert(&mut self, artifact: AtomId, entry: ChangeEntry) {
        self.changes.insert(artifact, entry);
        self.order.push(artifact);
    }
}

/// Write transaction
pub struct Transaction {
    basis: Basis,
    expansion: Expansion,
    state: Mutex<TxnState>,
}

impl Transaction {
    pub(crate) fn new(basis: Basis, expansion: Expansion) -> Self {
        Transaction {
            basis,
            expansion,
            state: Mutex::new(TxnState {
                status: TransactionStatus::Pending,
                changes: FxHashMap::default(),
                order: Vec::new(),
                ethereal: Vec::new(),
                forced: false,
            }),
        }
    }

    /// Owning basis
    pub fn basis(&self) -> &Basis {
        &self.basis
    }

    /// Current lifecycle status
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Counter of a successful commit
    pub fn commit_wcn(&self) -> Option<Wcn> {
        match self.status() {
            TransactionStatus::Committed(wcn) => Some(wcn),
            _ => None,
        }
    }

    // ========================================================================
    // Creators
    // ========================================================================

    /// Create an ordinary artifact
    pub fn create_artifact(&self) -> Result<RevisionCreator> {
        self.create(false)
    }

    /// Create a remote-capable artifact (main chain plus local chains)
    pub fn create_remote_artifact(&self) -> Result<RevisionCreator> {
        self.create(true)
    }

    fn create(&self, remote: bool) -> Result<RevisionCreator> {
        let mut state = self.state.lock();
        state.ensure_pending()?;

        let atom = self.expansion.create_atom()?;
        let key = atom.id();
        let creator = self.with_atom(atom, |basis, atom| {
            RevisionCreator::new_artifact(basis, atom, remote)
        })?;
        self.expansion.add_listener(creator.listener())?;
        self.basis
            .register_ethereal(ArtifactImpl::ethereal(key, remote, creator.clone()));

        state.ethereal.push(key);
        state.insert(
            key,
            ChangeEntry {
                creator: creator.clone(),
                strategy: AccessStrategy::DEFAULT,
                base: None,
            },
        );
        debug!(target: "revstore::txn", artifact = %key, remote, "Artifact created");
        Ok(creator)
    }

    /// Creator of the next revision of `artifact` under the default strategy
    pub fn change(&self, artifact: &Artifact) -> Result<RevisionCreator> {
        self.change_with(artifact, AccessStrategy::DEFAULT, None)
    }

    /// Creator of the next revision of `artifact`
    ///
    /// `base` selects the revision the draft builds on (default: the chain's
    /// last revision). A base older than the chain's last makes the commit
    /// fail with `CommitConflict`.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the artifact is already being changed with a
    /// different strategy or base, or `base` is not on the selected chain.
    pub fn change_with(
        &self,
        artifact: &Artifact,
        strategy: AccessStrategy,
        base: Option<&Revision>,
    ) -> Result<RevisionCreator> {
        let key = artifact.key();
        let base_key = base.map(Revision::key);
        {
            let state = self.state.lock();
            state.ensure_pending()?;
            if let Some(entry) = state.changes.get(&key) {
                return entry.reuse(artifact, strategy, base_key);
            }
        }

        // Chain walking happens with the state unlocked
        let remote = artifact.has_remote_extension()?;
        let chain = artifact.chain(strategy)?;
        let prev = match base {
            Some(base) => {
                if !chain.contains_revision(base)? {
                    return Err(Error::InvalidOperation(format!(
                        "{} is not on {:?}",
                        base, chain
                    )));
                }
                committed(base)?
            }
            None => committed(&chain.last_revision()?)?,
        };
        let target = if remote && strategy == AccessStrategy::Local {
            self.local_target(key, &prev)?
        } else {
            Target::Append { head: key }
        };

        let mut state = self.state.lock();
        state.ensure_pending()?;
        if let Some(entry) = state.changes.get(&key) {
            return entry.reuse(artifact, strategy, base_key);
        }
        let atom = self.expansion.create_atom()?;
        let creator = self.with_atom(atom, |basis, atom| match target {
            Target::Append { head } => RevisionCreator::append(basis, atom, key, head, prev),
            Target::OpenLocal { expected } => {
                RevisionCreator::open_local(basis, atom, key, prev, expected)
            }
        })?;
        self.expansion.add_listener(creator.listener())?;
        state.insert(
            key,
            ChangeEntry {
                creator: creator.clone(),
                strategy,
                base: base_key,
            },
        );
        debug!(target: "revstore::txn", artifact = %key, %strategy, revision = %creator.key(), "Changing artifact");
        Ok(creator)
    }

    /// Where a local change of a remote-capable artifact goes: the open local
    /// chain when `prev` is on it, else a new local chain
    fn local_target(&self, artifact: AtomId, prev: &CommittedRevision) -> Result<Target> {
        let universe = self.basis.universe();
        let open = self
            .basis
            .consistency()
            .run("open local chain", || discovery::open_local_chain(universe, artifact))?;
        let prev_head = prev.atom()?.get_ref(SystemKey::ChainHead);

        Ok(match open {
            Some(local) if prev_head == Some(local.head) => Target::Append { head: local.head },
            _ => Target::OpenLocal {
                expected: discovery::newest_local_head(universe, artifact),
            },
        })
    }

    /// Run a creator constructor, discarding the fresh atom if it fails
    fn with_atom<F>(&self, atom: Atom, build: F) -> Result<RevisionCreator>
    where
        F: FnOnce(&Basis, Atom) -> Result<RevisionCreator>,
    {
        let id = atom.id();
        build(&self.basis, atom).map_err(|e| {
            if let Err(discard) = self.expansion.discard_atom(id) {
                error!(target: "revstore::txn", atom = %id, error = %discard, "Failed to discard atom");
            }
            e
        })
    }

    /// Append a closure revision to the open local chain of `artifact`
    ///
    /// Afterwards the local view falls back to the main chain and the next
    /// local change opens a new local chain.
    pub fn close_local_chain(&self, artifact: &Artifact) -> Result<()> {
        if !artifact.has_remote_extension()? {
            return Err(Error::InvalidOperation(format!(
                "{} has no local chains",
                artifact
            )));
        }
        let existing = {
            let state = self.state.lock();
            state.ensure_pending()?;
            state.changes.get(&artifact.key()).map(|e| (e.creator.clone(), e.strategy))
        };

        let creator = match existing {
            Some((creator, AccessStrategy::Local))
                if !matches!(creator.kind(), CreatorKind::NewArtifact { .. }) =>
            {
                creator
            }
            Some(_) => {
                return Err(Error::InvalidOperation(format!(
                    "{} is changed outside a local chain",
                    artifact
                )))
            }
            None => {
                let universe = self.basis.universe();
                let open = self.basis.consistency().run("open local chain", || {
                    discovery::open_local_chain(universe, artifact.key())
                })?;
                if open.is_none() {
                    return Err(Error::InvalidOperation(format!(
                        "{} has no open local chain",
                        artifact
                    )));
                }
                self.change_with(artifact, AccessStrategy::Local, None)?
            }
        };
        creator.mark_closure()?;
        debug!(target: "revstore::txn", %artifact, revision = %creator.key(), "Closing local chain");
        Ok(())
    }

    /// Check if `artifact` has a creator in this transaction
    pub fn is_changing(&self, artifact: &Artifact) -> bool {
        self.state.lock().changes.contains_key(&artifact.key())
    }

    /// Every creator, in the order they were handed out
    pub fn pending_changes(&self) -> Vec<RevisionCreator> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|key| state.changes.get(key))
            .map(|entry| entry.creator.clone())
            .collect()
    }

    /// Check if committing now would publish nothing
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        !state.forced && state.changes.values().all(|e| e.creator.is_empty())
    }

    /// Advance the commit counter even if nothing changes
    pub fn force_not_empty(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_pending()?;
        self.expansion.force_not_empty()?;
        state.forced = true;
        Ok(())
    }

    // ========================================================================
    // Commit and rollback
    // ========================================================================

    /// Commit every creator atomically
    ///
    /// An empty transaction commits without advancing the counter and returns
    /// the current one.
    ///
    /// # Errors
    ///
    /// `CommitConflict` if another writer appended to a chain this
    /// transaction extends, or whatever the storage commit reports.
    pub fn commit(&self) -> Result<Wcn> {
        let empty = {
            let mut state = self.state.lock();
            state.ensure_pending()?;
            state.status = TransactionStatus::Committing;
            !state.forced && state.changes.values().all(|e| e.creator.is_empty())
        };

        let result = self.expansion.commit();

        let ethereal = {
            let mut state = self.state.lock();
            state.status = match &result {
                Ok(wcn) => TransactionStatus::Committed(*wcn),
                Err(_) => TransactionStatus::CommitError,
            };
            std::mem::take(&mut state.ethereal)
        };
        self.basis.finish_ethereal(&ethereal);

        match &result {
            Ok(wcn) if empty => {
                debug!(target: "revstore::txn", wcn = %wcn, "Empty transaction committed")
            }
            Ok(wcn) => info!(target: "revstore::txn", wcn = %wcn, "Transaction committed"),
            Err(e) => warn!(target: "revstore::txn", error = %e, "Transaction commit failed"),
        }
        result
    }

    /// Abandon every creator
    ///
    /// Rolling back twice is a no-op.
    pub fn rollback(&self) -> Result<()> {
        let ethereal = {
            let mut state = self.state.lock();
            if state.status == TransactionStatus::RolledBack {
                return Ok(());
            }
            state.ensure_pending()?;
            state.status = TransactionStatus::RolledBack;
            std::mem::take(&mut state.ethereal)
        };
        // Listener callbacks run with the state unlocked
        let result = self.expansion.rollback();
        self.basis.finish_ethereal(&ethereal);
        match &result {
            Ok(()) => debug!(target: "revstore::txn", "Transaction rolled back"),
            Err(e) => warn!(target: "revstore::txn", error = %e, "Rollback failed"),
        }
        result
    }
}

fn committed(revision: &Revision) -> Result<CommittedRevision> {
    revision.committed().ok_or_else(|| {
        Error::InvalidOperation(format!("{} is not committed", revision))
    })
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.status() == TransactionStatus::Pending {
            if let Err(e) = self.rollback() {
                error!(target: "revstore::txn", error = %e, "Rollback on drop failed");
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transaction")
            .field("status", &state.status)
            .field("changes", &state.order.len())
            .finish()
    }
}
