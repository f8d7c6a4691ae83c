//! Local edits on remote-capable artifacts

use crate::common::*;

fn remote_bug(store: &TestStore, title: &str) -> Artifact {
    let txn = store.basis.begin().unwrap();
    let creator = txn.create_remote_artifact().unwrap();
    creator.set_value(store.attrs.title, title).unwrap();
    creator.set_value(store.attrs.status, "NEW").unwrap();
    txn.commit().unwrap();
    creator.artifact()
}

fn main_status(store: &TestStore, bug: &Artifact) -> Option<String> {
    let main = bug
        .chain(AccessStrategy::MainChain)
        .unwrap()
        .last_revision()
        .unwrap();
    store.status_of(&main)
}

#[test]
fn local_edits_shadow_main_chain_until_closed() {
    let store = TestStore::new();
    let bug = remote_bug(&store, "mirrored");

    store.set_status(&bug, "LOCAL-ASSIGNED");
    store.set_status(&bug, "LOCAL-RESOLVED");
    assert_eq!(
        store.status_of(&bug.last_revision().unwrap()).as_deref(),
        Some("LOCAL-RESOLVED")
    );
    assert_eq!(main_status(&store, &bug).as_deref(), Some("NEW"));

    let txn = store.basis.begin().unwrap();
    txn.close_local_chain(&bug).unwrap();
    txn.commit().unwrap();

    assert_eq!(
        store.status_of(&bug.last_revision().unwrap()).as_deref(),
        Some("NEW")
    );
}

#[test]
fn main_chain_updates_show_through_without_local_edits() {
    let store = TestStore::new();
    let bug = remote_bug(&store, "synced");

    let txn = store.basis.begin().unwrap();
    txn.change_with(&bug, AccessStrategy::MainChain, None)
        .unwrap()
        .set_value(store.attrs.status, "UPSTREAM-FIXED")
        .unwrap();
    txn.commit().unwrap();

    assert_eq!(main_status(&store, &bug).as_deref(), Some("UPSTREAM-FIXED"));
    assert_eq!(
        store.status_of(&bug.last_revision().unwrap()).as_deref(),
        Some("UPSTREAM-FIXED")
    );
}

#[test]
fn ordinary_artifacts_have_no_main_chain() {
    let store = TestStore::new();
    let (bug, _) = store.file_bug("local only");
    assert!(!bug.has_remote_extension().unwrap());
    assert!(matches!(
        bug.chain(AccessStrategy::MainChain),
        Err(Error::UnsupportedStrategy { .. })
    ));
}
