//! Transactions: conflicts, retries, rollback, ethereal artifacts

mod common;

use common::*;
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// Conflicts
// ============================================================================

/// Test: a draft based on a revision that is no longer last fails to commit
#[test]
fn test_stale_base_revision_conflicts() {
    let basis = basis();
    let status = attr(1);
    let (artifact, _) = create(&basis, &[(status, "NEW".into())]);
    let r0 = artifact.last_revision().unwrap();
    change(&basis, &artifact, &[(status, "ASSIGNED".into())]);
    let before = basis.current_wcn();

    let txn = basis.begin().unwrap();
    let creator = txn
        .change_with(&artifact, AccessStrategy::Local, Some(&r0))
        .unwrap();
    creator.set_value(status, "RESOLVED").unwrap();
    let err = txn.commit().unwrap_err();

    assert!(err.is_conflict(), "unexpected error: {}", err);
    assert!(matches!(err, Error::CommitConflict { chain, .. } if chain == artifact.key()));
    assert_eq!(txn.status(), TransactionStatus::CommitError);
    assert_eq!(basis.current_wcn(), before);
    assert_eq!(
        text(&artifact.last_revision().unwrap(), status).as_deref(),
        Some("ASSIGNED")
    );
}

/// Test: two transactions interleave on one chain; the second commit fails
#[test]
fn test_interleaved_appends_conflict() {
    let basis = basis();
    let count = attr(1);
    let (artifact, _) = create(&basis, &[(count, Value::Int(0))]);

    let first = basis.begin().unwrap();
    let second = basis.begin().unwrap();
    first.change(&artifact).unwrap().set_value(count, 1i64).unwrap();
    second.change(&artifact).unwrap().set_value(count, 2i64).unwrap();

    first.commit().unwrap();
    assert!(second.commit().unwrap_err().is_conflict());
    assert_eq!(artifact.value(count).unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_one_creator_per_artifact() {
    let basis = basis();
    let (artifact, _) = create(&basis, &[(attr(1), Value::Int(0))]);
    let r0 = artifact.last_revision().unwrap();

    let txn = basis.begin().unwrap();
    let creator = txn.change(&artifact).unwrap();
    assert!(txn.is_changing(&artifact));
    assert_eq!(txn.change(&artifact).unwrap().key(), creator.key());
    assert!(matches!(
        txn.change_with(&artifact, AccessStrategy::Local, Some(&r0)),
        Err(Error::InvalidOperation(_))
    ));
    assert_eq!(txn.pending_changes().len(), 1);
}

#[test]
fn test_repeat_until_no_collisions_serializes_increments() {
    let basis = basis();
    let count = attr(1);
    let (artifact, _) = create(&basis, &[(count, Value::Int(0))]);

    const THREADS: usize = 4;
    const INCREMENTS: usize = 5;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let basis = basis.clone();
            let artifact = artifact.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..INCREMENTS {
                    basis
                        .repeat_until_no_collisions(1000, |txn| {
                            let creator = txn.change(&artifact)?;
                            let current = creator
                                .value(count)?
                                .and_then(|v| v.as_int())
                                .unwrap_or(0);
                            creator.set_value(count, current + 1)
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        artifact.value(count).unwrap(),
        Some(Value::Int((THREADS * INCREMENTS) as i64))
    );
    assert_eq!(
        artifact.default_chain().unwrap().complete_revisions().unwrap().len(),
        THREADS * INCREMENTS + 1
    );
}

#[test]
fn test_repeat_until_no_collisions_passes_other_errors_through() {
    let basis = basis();
    let mut calls = 0;
    let err = basis
        .repeat_until_no_collisions(5, |_txn| -> revstore_engine::Result<()> {
            calls += 1;
            Err(Error::InvalidOperation("boom".into()))
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert_eq!(calls, 1);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_rollback_publishes_nothing() {
    let basis = basis();
    let before = basis.current_wcn();

    let txn = basis.begin().unwrap();
    let creator = txn.create_artifact().unwrap();
    creator.set_value(attr(1), "never").unwrap();
    assert_eq!(basis.cache_stats().ethereal, 1);
    txn.rollback().unwrap();
    txn.rollback().unwrap();

    assert_eq!(txn.status(), TransactionStatus::RolledBack);
    assert_eq!(basis.current_wcn(), before);
    assert_eq!(basis.cache_stats().ethereal, 0);
    assert!(basis.artifact_or_none(creator.key()).unwrap().is_none());
    assert!(txn.commit().is_err());
}

#[test]
fn test_drop_rolls_back_pending_transaction() {
    let basis = basis();
    let key = {
        let txn = basis.begin().unwrap();
        txn.create_artifact().unwrap().key()
    };
    assert_eq!(basis.cache_stats().ethereal, 0);
    assert!(basis.artifact_or_none(key).unwrap().is_none());
}

#[test]
fn test_ethereal_artifact_is_visible_until_commit() {
    let basis = basis();
    let title = attr(1);

    let txn = basis.begin().unwrap();
    let creator = txn.create_artifact().unwrap();
    creator.set_value(title, "draft").unwrap();

    let artifact = basis.artifact(creator.key()).unwrap();
    let pending = artifact.last_revision().unwrap();
    assert!(pending.is_pending());
    assert_eq!(text(&pending, title).as_deref(), Some("draft"));
    assert_eq!(artifact.first_revision().unwrap(), pending);

    let wcn = txn.commit().unwrap();
    assert_eq!(basis.cache_stats().ethereal, 0);
    let committed = artifact.last_revision().unwrap();
    assert!(!committed.is_pending());
    assert_eq!(committed.wcn(), wcn);
    assert_eq!(committed.key(), creator.key());
}

#[test]
fn test_physical_chain_of_ethereal_artifact() {
    let basis = basis();
    let title = attr(1);

    let txn = basis.begin().unwrap();
    let creator = txn.create_artifact().unwrap();
    creator.set_value(title, "draft").unwrap();

    let chain = basis.physical_chain(creator.key()).unwrap();
    assert_eq!(chain.key(), creator.key());
    let pending = chain.last_revision().unwrap();
    assert!(pending.is_pending());
    assert_eq!(text(&pending, title).as_deref(), Some("draft"));

    let wcn = txn.commit().unwrap();
    let chain = basis.physical_chain(creator.key()).unwrap();
    let committed = chain.last_revision().unwrap();
    assert!(!committed.is_pending());
    assert_eq!(committed.wcn(), wcn);
}

#[test]
fn test_unknown_artifact_key_is_invalid() {
    let basis = basis();
    let missing = AtomId::new(987_654_321);

    let err = basis.artifact(missing).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)), "got {:?}", err);
    assert!(!err.is_transient());
    assert!(basis.artifact_or_none(missing).unwrap().is_none());
}

#[test]
fn test_concurrent_change_requests_share_one_creator() {
    let basis = basis();
    let status = attr(1);
    let (artifact, _) = create(&basis, &[(status, "NEW".into())]);
    let txn = Arc::new(basis.begin().unwrap());

    const THREADS: usize = 8;
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let txn = Arc::clone(&txn);
            let artifact = artifact.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let creator = txn.change(&artifact).unwrap();
                assert!(txn.is_changing(&artifact));
                creator.key()
            })
        })
        .collect();
    let keys: Vec<AtomId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(keys.iter().all(|k| *k == keys[0]));
    assert_eq!(txn.pending_changes().len(), 1);

    txn.pending_changes()[0].set_value(status, "ASSIGNED").unwrap();
    txn.commit().unwrap();
    let history = artifact
        .chain(AccessStrategy::Local)
        .unwrap()
        .complete_revisions()
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        artifact.value(status).unwrap(),
        Some(Value::from("ASSIGNED"))
    );
}

#[test]
fn test_artifacts_in_one_commit_share_counter_and_may_refer() {
    let basis = basis();
    let link = attr(1);

    let txn = basis.begin().unwrap();
    let parent = txn.create_artifact().unwrap();
    let child = txn.create_artifact().unwrap();
    child.set_value(link, parent.key()).unwrap();
    let wcn = txn.commit().unwrap();

    assert_eq!(parent.artifact().wcn().unwrap(), wcn);
    assert_eq!(child.artifact().wcn().unwrap(), wcn);
    assert_eq!(
        child.artifact().value(link).unwrap(),
        Some(Value::Reference(parent.key()))
    );
}

#[test]
fn test_dangling_reference_fails_commit() {
    let basis = basis();
    let before = basis.current_wcn();

    let txn = basis.begin().unwrap();
    let creator = txn.create_artifact().unwrap();
    creator
        .set_value(attr(1), Value::Reference(AtomId::new(u64::MAX - 1)))
        .unwrap();
    assert!(matches!(txn.commit(), Err(Error::InvalidOperation(_))));
    assert_eq!(txn.status(), TransactionStatus::CommitError);
    assert_eq!(basis.current_wcn(), before);
    assert_eq!(basis.cache_stats().ethereal, 0);
}

#[test]
fn test_force_not_empty_advances_counter() {
    let basis = basis();
    let before = basis.current_wcn();

    let txn = basis.begin().unwrap();
    assert!(txn.is_empty());
    txn.force_not_empty().unwrap();
    assert!(!txn.is_empty());
    assert_eq!(txn.commit().unwrap(), before.next());
    assert_eq!(txn.commit_wcn(), Some(before.next()));
}

#[test]
fn test_read_only_basis_rejects_transactions() {
    init_tracing();
    let universe = Universe::new();
    let writable = Basis::open(universe.clone(), RevStoreConfig::default()).unwrap();
    let (artifact, _) = create(&writable, &[(attr(1), "kept".into())]);

    let config = RevStoreConfig {
        read_only: true,
        ..RevStoreConfig::default()
    };
    let reader = Basis::open(universe, config).unwrap();
    assert!(matches!(reader.begin(), Err(Error::InvalidOperation(_))));
    assert_eq!(
        reader.artifact(artifact.key()).unwrap().value(attr(1)).unwrap(),
        Some(Value::from("kept"))
    );
    assert_eq!(reader.schema(), writable.schema());
}
