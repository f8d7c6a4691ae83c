//! Bug tracker workflow

use crate::common::*;

#[test]
fn bug_history_is_browsable_by_counter() {
    let store = TestStore::new();
    let (bug, filed) = store.file_bug("crash on save");
    let assigned = store.set_status(&bug, "ASSIGNED");
    let resolved = store.set_status(&bug, "RESOLVED");

    let now = bug.last_revision().unwrap();
    assert_eq!(store.status_of(&now).as_deref(), Some("RESOLVED"));
    assert_eq!(now.wcn(), resolved);

    let at = |wcn: Wcn| {
        let revision = bug.last_revision_at(wcn, AccessStrategy::Local).unwrap();
        store.status_of(&revision)
    };
    assert_eq!(at(assigned).as_deref(), Some("NEW"));
    assert_eq!(at(resolved).as_deref(), Some("ASSIGNED"));
    assert_eq!(at(resolved.next()).as_deref(), Some("RESOLVED"));
    assert!(bug
        .last_revision_or_none(filed, AccessStrategy::Local)
        .unwrap()
        .is_none());

    // Title was only written once and resolves through history
    assert_eq!(
        now.value(store.attrs.title).unwrap(),
        Some(Value::from("crash on save"))
    );
    assert_eq!(now.changes().unwrap().len(), 1);
}

#[test]
fn linked_bugs_commit_together() {
    let store = TestStore::new();
    let attrs = store.attrs;

    let txn = store.basis.begin().unwrap();
    let parent = txn.create_artifact().unwrap();
    parent.set_value(attrs.title, "umbrella").unwrap();
    let child = txn.create_artifact().unwrap();
    child.set_value(attrs.title, "sub-task").unwrap();
    child.set_value(attrs.assignee, parent.key()).unwrap();
    let wcn = txn.commit().unwrap();

    let child = child.artifact();
    let link = child.value(attrs.assignee).unwrap().unwrap();
    let parent = store.basis.artifact(link.as_reference().unwrap()).unwrap();
    assert_eq!(parent.wcn().unwrap(), wcn);
    assert_eq!(child.wcn().unwrap(), wcn);
}

#[test]
fn comments_accumulate_in_list_values() {
    let store = TestStore::new();
    let comments = store.attrs.comments;
    let (bug, _) = store.file_bug("slow search");

    for text in ["repro attached", "bisected", "fixed in trunk"] {
        store
            .basis
            .repeat_until_no_collisions(3, |txn| {
                let creator = txn.change(&bug)?;
                let mut list = match creator.value(comments)? {
                    Some(Value::List(items)) => items,
                    _ => Vec::new(),
                };
                list.push(Value::from(text));
                creator.set_value(comments, list)
            })
            .unwrap();
    }

    let list = bug.value(comments).unwrap().unwrap();
    assert_eq!(
        list,
        Value::List(vec![
            Value::from("repro attached"),
            Value::from("bisected"),
            Value::from("fixed in trunk"),
        ])
    );
    assert_eq!(
        bug.default_chain().unwrap().complete_revisions().unwrap().len(),
        4
    );
}

#[test]
fn deleted_bug_keeps_history() {
    let store = TestStore::new();
    let (bug, _) = store.file_bug("duplicate");
    let before_delete = store.set_status(&bug, "DUPLICATE");

    let txn = store.basis.begin().unwrap();
    txn.change(&bug).unwrap().delete_object().unwrap();
    txn.commit().unwrap();

    assert!(bug.is_deleted().unwrap());
    let earlier = bug
        .last_revision_at(before_delete.next(), AccessStrategy::Local)
        .unwrap();
    assert_eq!(store.status_of(&earlier).as_deref(), Some("DUPLICATE"));
    assert_eq!(
        earlier.value(store.basis.schema().deleted).unwrap(),
        None
    );
}

#[test]
fn stale_edit_is_rejected_then_retried() {
    let store = TestStore::new();
    let status = store.attrs.status;
    let (bug, _) = store.file_bug("race");

    let slow = store.basis.begin().unwrap();
    slow.change(&bug).unwrap().set_value(status, "WONTFIX").unwrap();
    store.set_status(&bug, "ASSIGNED");

    let err = slow.commit().unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(slow.status(), TransactionStatus::CommitError);

    store
        .basis
        .repeat_until_no_collisions(3, |txn| txn.change(&bug)?.set_value(status, "WONTFIX"))
        .unwrap();
    assert_eq!(
        store.status_of(&bug.last_revision().unwrap()).as_deref(),
        Some("WONTFIX")
    );
}
