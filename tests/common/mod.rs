//! Shared test utilities for the top-level integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use once_cell::sync::Lazy;
pub use revstore::{
    AccessStrategy, Artifact, AtomId, Basis, Error, RevStoreConfig, Revision, Transaction,
    TransactionStatus, Universe, Value, Wcn,
};
use std::path::Path;
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
});

/// Route store logs to the test output
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

// ============================================================================
// TestStore - basis plus attribute names
// ============================================================================

/// Attribute keys of a small bug tracker
#[derive(Debug, Clone, Copy)]
pub struct BugAttrs {
    pub title: AtomId,
    pub status: AtomId,
    pub assignee: AtomId,
    pub comments: AtomId,
}

impl Default for BugAttrs {
    fn default() -> Self {
        BugAttrs {
            title: AtomId::new(5_000_001),
            status: AtomId::new(5_000_002),
            assignee: AtomId::new(5_000_003),
            comments: AtomId::new(5_000_004),
        }
    }
}

/// In-memory basis with logging enabled
pub struct TestStore {
    pub basis: Basis,
    pub attrs: BugAttrs,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_config(RevStoreConfig::default())
    }

    pub fn with_config(config: RevStoreConfig) -> Self {
        init_tracing();
        TestStore {
            basis: Basis::open(Universe::new(), config).unwrap(),
            attrs: BugAttrs::default(),
        }
    }

    /// File a bug and return it with its commit counter
    pub fn file_bug(&self, title: &str) -> (Artifact, Wcn) {
        let txn = self.basis.begin().unwrap();
        let creator = txn.create_artifact().unwrap();
        creator.set_value(self.attrs.title, title).unwrap();
        creator.set_value(self.attrs.status, "NEW").unwrap();
        let wcn = txn.commit().unwrap();
        (creator.artifact(), wcn)
    }

    /// Move `bug` to `status` in its own transaction
    pub fn set_status(&self, bug: &Artifact, status: &str) -> Wcn {
        let txn = self.basis.begin().unwrap();
        txn.change(bug).unwrap().set_value(self.attrs.status, status).unwrap();
        txn.commit().unwrap()
    }

    pub fn status_of(&self, revision: &Revision) -> Option<String> {
        revision
            .value(self.attrs.status)
            .unwrap()
            .and_then(|v| v.as_str().map(str::to_string))
    }
}

/// Temporary directory holding a default `revstore.toml`
pub fn config_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    RevStoreConfig::write_default_if_missing(&dir.path().join(revstore::CONFIG_FILE_NAME))
        .unwrap();
    dir
}

pub fn config_path(dir: &Path) -> std::path::PathBuf {
    dir.join(revstore::CONFIG_FILE_NAME)
}
