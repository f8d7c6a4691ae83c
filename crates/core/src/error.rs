//! Error types for revstore
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Taxonomy
//!
//! - **Transient inconsistency** (`Inconsistent`): retried by the consistency
//!   wrapper, surfaced as `RetriesExhausted` once the retry budget is spent.
//! - **Commit conflict** (`CommitConflict`): a verifier rejected the commit; the
//!   whole enclosing transaction is aborted and may be retried by the caller.
//! - **Programming errors** (`AlreadyBuilt`, `RecursiveLoad`, `InvalidOperation`,
//!   `UnsupportedStrategy`): fail fast, never retried.
//! - **Chain failures** (`Chain`, `ChainCycle`): the requested revision does not
//!   exist or the history is damaged.

use crate::types::AtomId;
use crate::wcn::Wcn;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for revstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a chain could not produce the requested revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFailure {
    /// The chain has no revisions at all
    NoRevisions,
    /// The chain's first revision is at or after the requested bound
    InFuture(Wcn),
    /// Walking back exhausted the chain without satisfying the bound
    NotFound,
}

impl fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFailure::NoRevisions => f.write_str("has no revisions"),
            ChainFailure::InFuture(wcn) => write!(f, "is in the future ({})", wcn),
            ChainFailure::NotFound => f.write_str("cannot find revisions"),
        }
    }
}

/// Error types for revstore
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (config files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file could not be parsed or is invalid
    #[error("Config error: {0}")]
    Config(String),

    /// Transient inconsistency observed while reading atoms
    #[error("Database inconsistent: {0}")]
    Inconsistent(String),

    /// The consistency wrapper gave up
    #[error("Still inconsistent after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        /// Attempts made
        attempts: usize,
        /// Message of the last inconsistency
        last: String,
    },

    /// A commit verifier rejected the transaction
    #[error("Commit conflict on chain {chain}: {reason}")]
    CommitConflict {
        /// Chain whose append raced
        chain: AtomId,
        /// Human-readable reason
        reason: String,
    },

    /// A revision creator was used after it stopped building
    #[error("Revision creator {0} is already built")]
    AlreadyBuilt(AtomId),

    /// A thread re-entered a value load it is already performing
    #[error("Recursive value load in cache {cache} for slot {slot}")]
    RecursiveLoad {
        /// Cache instance id
        cache: u64,
        /// Slot key
        slot: u64,
    },

    /// Artifact does not support the requested access strategy
    #[error("Artifact {artifact} does not support access strategy {strategy}")]
    UnsupportedStrategy {
        /// Artifact key
        artifact: AtomId,
        /// Strategy name
        strategy: &'static str,
    },

    /// A chain could not produce the requested revision
    #[error("Chain {chain} {failure}")]
    Chain {
        /// Chain key
        chain: AtomId,
        /// What went wrong
        failure: ChainFailure,
    },

    /// Walking a chain revisited an atom
    #[error("Chain cycled: from {start} after {steps} step(s)")]
    ChainCycle {
        /// Atom the walk started from
        start: AtomId,
        /// Steps taken before the cycle was detected
        steps: usize,
    },

    /// A loader this thread was waiting on panicked
    #[error("Interrupted while loading {0}")]
    Interrupted(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Check if retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Inconsistent(_))
    }

    /// Check if this is a commit conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::CommitConflict { .. })
    }

    /// Shorthand for a chain failure
    pub fn chain(chain: AtomId, failure: ChainFailure) -> Self {
        Error::Chain { chain, failure }
    }

    /// Shorthand for a transient inconsistency
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Error::Inconsistent(msg.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
