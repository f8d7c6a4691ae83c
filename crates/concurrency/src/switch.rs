//! One-way builder switch
//!
//! A `StateSwitch` owns a value that is first *building*, then *committing*,
//! and finally either *built* (replaced by its immutable result) or
//! *abandoned*. Every transition happens under one mutex, so a reader sees
//! either the complete pre-switch or the complete post-switch state.

use parking_lot::{Mutex, MutexGuard};

/// Phase of a switched value
#[derive(Debug)]
pub enum Phase<B, D> {
    /// Accepting changes
    Building(B),
    /// Commit callbacks running; no more user changes
    Committing(B),
    /// Frozen into its result
    Built(D),
    /// The enclosing commit failed
    Abandoned,
}

impl<B, D> Phase<B, D> {
    /// Builder, if still building
    pub fn building(&self) -> Option<&B> {
        match self {
            Phase::Building(b) => Some(b),
            _ => None,
        }
    }

    /// Mutable builder, if still building
    pub fn building_mut(&mut self) -> Option<&mut B> {
        match self {
            Phase::Building(b) => Some(b),
            _ => None,
        }
    }

    /// Builder while building or committing
    pub fn draft(&self) -> Option<&B> {
        match self {
            Phase::Building(b) | Phase::Committing(b) => Some(b),
            _ => None,
        }
    }

    /// Mutable builder while building or committing
    pub fn draft_mut(&mut self) -> Option<&mut B> {
        match self {
            Phase::Building(b) | Phase::Committing(b) => Some(b),
            _ => None,
        }
    }

    /// Result, once built
    pub fn built(&self) -> Option<&D> {
        match self {
            Phase::Built(d) => Some(d),
            _ => None,
        }
    }

    /// Phase name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Building(_) => "building",
            Phase::Committing(_) => "committing",
            Phase::Built(_) => "built",
            Phase::Abandoned => "abandoned",
        }
    }
}

/// Mutex-guarded `Phase`
#[derive(Debug)]
pub struct StateSwitch<B, D> {
    phase: Mutex<Phase<B, D>>,
}

impl<B, D> StateSwitch<B, D> {
    /// Start in the building phase
    pub fn new(builder: B) -> Self {
        StateSwitch {
            phase: Mutex::new(Phase::Building(builder)),
        }
    }

    /// Lock the phase
    pub fn lock(&self) -> MutexGuard<'_, Phase<B, D>> {
        self.phase.lock()
    }

    /// Move `Building` to `Committing`; returns `false` from any other phase
    pub fn begin_commit(&self) -> bool {
        let mut phase = self.phase.lock();
        match std::mem::replace(&mut *phase, Phase::Abandoned) {
            Phase::Building(b) => {
                *phase = Phase::Committing(b);
                true
            }
            other => {
                *phase = other;
                false
            }
        }
    }

    /// Freeze the builder into its result
    ///
    /// `finish` sees the builder (from `Building` or `Committing`) and produces
    /// the result. Returns `false` if there was no builder to freeze.
    pub fn finish<F>(&self, finish: F) -> bool
    where
        F: FnOnce(B) -> D,
    {
        let mut phase = self.phase.lock();
        match std::mem::replace(&mut *phase, Phase::Abandoned) {
            Phase::Building(b) | Phase::Committing(b) => {
                *phase = Phase::Built(finish(b));
                true
            }
            other => {
                *phase = other;
                false
            }
        }
    }

    /// Drop the builder without a result
    pub fn abandon(&self) {
        let mut phase = self.phase.lock();
        if !matches!(*phase, Phase::Built(_)) {
            *phase = Phase::Abandoned;
        }
    }

    /// Check if the switch reached `Built`
    pub fn is_built(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Built(_))
    }
}

impl<B, D: Clone> StateSwitch<B, D> {
    /// Clone of the result, once built
    pub fn result(&self) -> Option<D> {
        self.phase.lock().built().cloned()
    }
}
