//! revstore - embedded versioned-object store
//!
//! Every object (artifact) keeps an append-only chain of immutable revisions.
//! Writers stage drafts in a transaction and commit them atomically under a
//! global commit counter; readers see any artifact as of any earlier counter.
//! Remote-capable artifacts additionally keep local chains of edits branched
//! from their main chain.
//!
//! # Quick Start
//!
//! ```
//! use revstore::{AccessStrategy, AtomId, Basis, Value};
//!
//! let basis = Basis::in_memory()?;
//! let status = AtomId::new(1000);
//!
//! let txn = basis.begin()?;
//! let creator = txn.create_artifact()?;
//! creator.set_value(status, "OPEN")?;
//! let opened = txn.commit()?;
//!
//! let artifact = creator.artifact();
//! let txn = basis.begin()?;
//! txn.change(&artifact)?.set_value(status, "CLOSED")?;
//! let closed = txn.commit()?;
//!
//! // Time travel: the bound is exclusive
//! let then = artifact.last_revision_at(closed, AccessStrategy::Local)?;
//! assert_eq!(then.wcn(), opened);
//! assert_eq!(then.value(status)?, Some(Value::from("OPEN")));
//! # Ok::<(), revstore::Error>(())
//! ```
//!
//! # Architecture
//!
//! - `revstore-core`: ids, counters, values, errors
//! - `revstore-storage`: atoms, indexes and the commit path
//! - `revstore-concurrency`: caches, memos and retry wrappers
//! - `revstore-engine`: artifacts, revisions, chains and transactions
//!
//! Only the engine's API is re-exported here.

pub use revstore_engine::*;
