//! Shared helpers for the engine integration suites.

#![allow(dead_code)]

use once_cell::sync::Lazy;
pub use revstore_engine::{
    AccessStrategy, Artifact, AtomId, Basis, ChainFailure, Error, RevStoreConfig, Revision,
    RevisionCreator, Transaction, TransactionStatus, Universe, Value, Wcn,
};

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
});

/// Route engine logs to the test output
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// A fresh in-memory basis with logging enabled
pub fn basis() -> Basis {
    init_tracing();
    Basis::in_memory().unwrap()
}

/// User attribute key `n`
///
/// Attribute keys only name junctions; they never need to be atoms.
pub fn attr(n: u64) -> AtomId {
    AtomId::new(1_000_000 + n)
}

/// Create an artifact with `values` in its first revision
pub fn create(basis: &Basis, values: &[(AtomId, Value)]) -> (Artifact, Wcn) {
    let txn = basis.begin().unwrap();
    let creator = txn.create_artifact().unwrap();
    for (attribute, value) in values {
        creator.set_value(*attribute, value.clone()).unwrap();
    }
    let wcn = txn.commit().unwrap();
    (creator.artifact(), wcn)
}

/// Create a remote-capable artifact with `values` on its main chain
pub fn create_remote(basis: &Basis, values: &[(AtomId, Value)]) -> (Artifact, Wcn) {
    let txn = basis.begin().unwrap();
    let creator = txn.create_remote_artifact().unwrap();
    for (attribute, value) in values {
        creator.set_value(*attribute, value.clone()).unwrap();
    }
    let wcn = txn.commit().unwrap();
    (creator.artifact(), wcn)
}

/// Commit one revision of `artifact` with `values`
pub fn change(basis: &Basis, artifact: &Artifact, values: &[(AtomId, Value)]) -> Wcn {
    change_via(basis, artifact, AccessStrategy::Local, values)
}

/// Commit one revision of `artifact` through `strategy`
pub fn change_via(
    basis: &Basis,
    artifact: &Artifact,
    strategy: AccessStrategy,
    values: &[(AtomId, Value)],
) -> Wcn {
    let txn = basis.begin().unwrap();
    let creator = txn.change_with(artifact, strategy, None).unwrap();
    for (attribute, value) in values {
        creator.set_value(*attribute, value.clone()).unwrap();
    }
    txn.commit().unwrap()
}

/// String value of `attribute` at `revision`
pub fn text(revision: &Revision, attribute: AtomId) -> Option<String> {
    revision
        .value(attribute)
        .unwrap()
        .and_then(|v| v.as_str().map(str::to_string))
}
