//! Revision layer of revstore
//!
//! This crate turns the append-only atom store of `revstore-storage` into
//! versioned objects:
//! - Artifacts: stable identities with a revision history
//! - Revision chains: physical chains and local/main views of remote-capable
//!   artifacts, with time travel by commit counter
//! - Revisions: immutable snapshots with cached value resolution
//! - Revision creators and transactions: drafts committed atomically
//! - Basis: explicit context owning configuration, caches and schema
//!
//! # Example
//!
//! ```
//! use revstore_engine::{AtomId, Basis};
//!
//! let basis = Basis::in_memory().unwrap();
//! let title = AtomId::new(1000);
//!
//! let txn = basis.begin().unwrap();
//! let creator = txn.create_artifact().unwrap();
//! creator.set_value(title, "draft").unwrap();
//! txn.commit().unwrap();
//!
//! let artifact = creator.artifact();
//! assert_eq!(artifact.value(title).unwrap().unwrap().as_str(), Some("draft"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod artifact;
pub mod basis;
pub mod chain;
pub mod config;
pub mod creator;
pub mod discovery;
pub mod revision;
pub mod schema;
pub mod transaction;
pub mod typed;

pub use access::{AccessStrategy, RevisionIterator};
pub use artifact::Artifact;
pub use basis::{Basis, BasisStats};
pub use chain::RevisionChain;
pub use config::{RevStoreConfig, CONFIG_FILE_NAME};
pub use creator::RevisionCreator;
pub use discovery::LocalChain;
pub use revision::{CommittedRevision, Revision};
pub use schema::{AtomMarker, Schema};
pub use transaction::{Transaction, TransactionStatus};
pub use typed::TypedArtifact;

pub use revstore_concurrency::{CacheStats, ConsistencyConfig};
pub use revstore_core::{AtomId, ChainFailure, Error, Result, Value, Wcn};
pub use revstore_storage::Universe;
