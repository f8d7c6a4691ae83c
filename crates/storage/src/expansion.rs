//! Expansions: write transactions over the universe
//!
//! An expansion collects ethereal atoms and publishes them atomically under a
//! single new WCN.
//!
//! # Commit Sequence
//!
//! 1. Run every listener's `before_commit` (listeners may still write
//!    junctions, discard atoms, add verifiers and report references)
//! 2. Acquire the universe commit lock
//! 3. Run verifiers against the committed state
//! 4. Check that every referred atom exists
//! 5. Assign `wcn = current + 1`, freeze and publish the atoms
//! 6. Release the commit lock
//! 7. Run every listener's `after_commit` with the outcome
//!
//! A failure in steps 1-4 publishes nothing; listeners are told the commit
//! failed. An expansion whose atoms were all discarded commits without
//! advancing the counter, unless it was forced not empty.

use crate::atom::Atom;
use crate::universe::Universe;
use parking_lot::Mutex;
use revstore_core::{AtomId, Error, Result, Wcn};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Consistency check run under the commit lock
pub trait Verifier: Send + Sync {
    /// Fail to abort the commit
    fn verify(&self, universe: &Universe) -> Result<()>;
}

/// Participant notified around a commit
///
/// Callbacks run on the committing thread.
pub trait CommitListener: Send + Sync {
    /// Called before anything is published
    fn before_commit(&self, expansion: &Expansion) -> Result<()>;

    /// Called once the outcome is known: `Some(wcn)` on success
    fn after_commit(&self, expansion: &Expansion, committed: Option<Wcn>);
}

/// Expansion lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionStatus {
    /// Accepting atoms
    Open,
    /// Running the commit sequence
    Committing,
    /// Published (or had nothing to publish) at this counter
    Committed(Wcn),
    /// Commit failed, nothing published
    Failed,
    /// Rolled back, nothing published
    RolledBack,
}

struct ExpansionState {
    status: ExpansionStatus,
    atoms: Vec<Atom>,
    discarded: FxHashSet<AtomId>,
    verifiers: Vec<Box<dyn Verifier>>,
    referred: FxHashSet<AtomId>,
    listeners: Vec<Arc<dyn CommitListener>>,
    forced: bool,
}

/// Write transaction over a universe
pub struct Expansion {
    universe: Arc<Universe>,
    state: Mutex<ExpansionState>,
}

impl Expansion {
    pub(crate) fn new(universe: Arc<Universe>) -> Self {
        Expansion {
            universe,
            state: Mutex::new(ExpansionState {
                status: ExpansionStatus::Open,
                atoms: Vec::new(),
                discarded: FxHashSet::default(),
                verifiers: Vec::new(),
                referred: FxHashSet::default(),
                listeners: Vec::new(),
                forced: false,
            }),
        }
    }

    /// The universe this expansion writes to
    pub fn universe(&self) -> &Arc<Universe> {
        &self.universe
    }

    /// Current lifecycle status
    pub fn status(&self) -> ExpansionStatus {
        self.state.lock().status
    }

    /// Counter assigned by a successful commit
    pub fn commit_wcn(&self) -> Option<Wcn> {
        match self.status() {
            ExpansionStatus::Committed(wcn) => Some(wcn),
            _ => None,
        }
    }

    /// Create a new ethereal atom
    pub fn create_atom(&self) -> Result<Atom> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        let atom = Atom::ethereal(self.universe.allocate_id());
        state.atoms.push(atom.clone());
        Ok(atom)
    }

    /// Drop an ethereal atom so the commit does not publish it
    pub fn discard_atom(&self, id: AtomId) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        if !state.atoms.iter().any(|a| a.id() == id) {
            return Err(Error::InvalidOperation(format!(
                "atom {} does not belong to this expansion",
                id
            )));
        }
        state.discarded.insert(id);
        Ok(())
    }

    /// Ethereal atom created (and not discarded) in this expansion
    pub fn ethereal_atom(&self, id: AtomId) -> Option<Atom> {
        let state = self.state.lock();
        if state.discarded.contains(&id) {
            return None;
        }
        state.atoms.iter().find(|a| a.id() == id).cloned()
    }

    /// Check if an atom was created (and not discarded) in this expansion
    pub fn contains_atom(&self, id: AtomId) -> bool {
        self.ethereal_atom(id).is_some()
    }

    /// Register a consistency check for the commit
    pub fn add_verifier(&self, verifier: Box<dyn Verifier>) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        state.verifiers.push(verifier);
        Ok(())
    }

    /// Report that a published atom will refer to `id`
    pub fn atom_referred(&self, id: AtomId) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        state.referred.insert(id);
        Ok(())
    }

    /// Advance the commit counter even if no atom is published
    pub fn force_not_empty(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        state.forced = true;
        Ok(())
    }

    /// Register a commit participant
    pub fn add_listener(&self, listener: Arc<dyn CommitListener>) -> Result<()> {
        let mut state = self.state.lock();
        if state.status != ExpansionStatus::Open {
            return Err(Error::InvalidOperation(
                "cannot add listeners once the commit started".into(),
            ));
        }
        state.listeners.push(listener);
        Ok(())
    }

    /// Run the commit sequence
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the expansion is not open, or an atom refers to
    ///   an atom that does not exist
    /// - whatever a listener or verifier reports (typically `CommitConflict`)
    pub fn commit(&self) -> Result<Wcn> {
        let listeners = {
            let mut state = self.state.lock();
            if state.status != ExpansionStatus::Open {
                return Err(Error::InvalidOperation(format!(
                    "cannot commit expansion in state {:?}",
                    state.status
                )));
            }
            state.status = ExpansionStatus::Committing;
            state.listeners.clone()
        };

        for listener in &listeners {
            if let Err(e) = listener.before_commit(self) {
                return Err(self.fail(&listeners, e));
            }
        }

        match self.publish() {
            Ok(wcn) => {
                for listener in &listeners {
                    listener.after_commit(self, Some(wcn));
                }
                Ok(wcn)
            }
            Err(e) => Err(self.fail(&listeners, e)),
        }
    }

    /// Abandon the expansion
    ///
    /// Rolling back twice is a no-op; rolling back a finished commit is an error.
    pub fn rollback(&self) -> Result<()> {
        let listeners = {
            let mut state = self.state.lock();
            match state.status {
                ExpansionStatus::Open => {}
                ExpansionStatus::RolledBack => return Ok(()),
                other => {
                    return Err(Error::InvalidOperation(format!(
                        "cannot roll back expansion in state {:?}",
                        other
                    )))
                }
            }
            state.status = ExpansionStatus::RolledBack;
            std::mem::take(&mut state.listeners)
        };
        for listener in &listeners {
            listener.after_commit(self, None);
        }
        Ok(())
    }

    fn check_writable(state: &ExpansionState) -> Result<()> {
        match state.status {
            ExpansionStatus::Open | ExpansionStatus::Committing => Ok(()),
            other => Err(Error::InvalidOperation(format!(
                "expansion is no longer writable ({:?})",
                other
            ))),
        }
    }

    fn publish(&self) -> Result<Wcn> {
        let _commit = self.universe.commit_lock.lock();

        let (atoms, verifiers, referred, forced) = {
            let mut state = self.state.lock();
            let discarded = std::mem::take(&mut state.discarded);
            let atoms: Vec<Atom> = std::mem::take(&mut state.atoms)
                .into_iter()
                .filter(|a| !discarded.contains(&a.id()))
                .collect();
            (
                atoms,
                std::mem::take(&mut state.verifiers),
                std::mem::take(&mut state.referred),
                state.forced,
            )
        };

        for verifier in &verifiers {
            verifier.verify(&self.universe)?;
        }

        for id in &referred {
            if !self.universe.contains_atom(*id) && !atoms.iter().any(|a| a.id() == *id) {
                return Err(Error::InvalidOperation(format!(
                    "commit refers to unknown atom {}",
                    id
                )));
            }
        }

        let wcn = if atoms.is_empty() && !forced {
            self.universe.current_wcn()
        } else {
            let wcn = self.universe.current_wcn().next();
            self.universe.publish(&atoms, wcn);
            wcn
        };

        self.state.lock().status = ExpansionStatus::Committed(wcn);
        debug!(target: "revstore::storage", wcn = %wcn, atoms = atoms.len(), "Expansion committed");
        Ok(wcn)
    }

    fn fail(&self, listeners: &[Arc<dyn CommitListener>], error: Error) -> Error {
        self.state.lock().status = ExpansionStatus::Failed;
        warn!(target: "revstore::storage", error = %error, "Expansion commit failed");
        for listener in listeners {
            listener.after_commit(self, None);
        }
        error
    }
}

impl std::fmt::Debug for Expansion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expansion")
            .field("status", &self.status())
            .finish()
    }
}
