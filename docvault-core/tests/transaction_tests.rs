// transaction_tests.rs
// Snapshot isolation, atomic commit and conflict handling

mod common;

use std::sync::atomic::{AtomicU32, Ordering};

use common::{names, open_db, seeded_db};
use docvault_core::{DocVaultError, DocumentId, ErrorKind, TransactionConfig, TransactionState};
use serde_json::json;

// =============================================================================
// ISOLATION
// =============================================================================

#[test]
fn test_reads_see_snapshot_not_later_commits() {
    let (_dir, db) = seeded_db();
    let reader = db.begin().unwrap();

    let users = db.collection("users").unwrap();
    users.insert(json!({"_id": 6, "name": "Frank", "age": 50})).unwrap();
    users.delete_by_id(&DocumentId::Int(1)).unwrap();
    users
        .update_by_id(&DocumentId::Int(2), &json!({"age": 18}))
        .unwrap();

    assert_eq!(reader.count("users").unwrap(), 5);
    assert!(reader.find_by_id("users", &DocumentId::Int(1)).unwrap().is_some());
    assert!(reader.find_by_id("users", &DocumentId::Int(6)).unwrap().is_none());
    let bob = reader.find_by_id("users", &DocumentId::Int(2)).unwrap().unwrap();
    assert_eq!(bob["age"], 17);

    let fresh = db.begin().unwrap();
    assert_eq!(fresh.count("users").unwrap(), 5);
    assert!(fresh.find_by_id("users", &DocumentId::Int(1)).unwrap().is_none());
}

#[test]
fn test_own_writes_visible_before_commit() {
    let (_dir, db) = seeded_db();
    let mut tx = db.begin().unwrap();
    tx.insert("users", json!({"_id": 10, "name": "Zed", "age": 60}))
        .unwrap();
    tx.delete_by_id("users", &DocumentId::Int(3)).unwrap();
    tx.update("users", "city is \"Bergen\"", &json!({"city": "Stavanger"}))
        .unwrap();

    let older = tx.find("users", "age > 40").unwrap();
    assert_eq!(names(&older), vec!["Zed"]);
    assert_eq!(tx.find("users", "city is \"Stavanger\"").unwrap().len(), 2);

    // nothing leaks to other readers
    let other = db.collection("users").unwrap();
    assert_eq!(other.find("city is \"Bergen\"").unwrap().len(), 2);
    assert!(other.find_by_id(&DocumentId::Int(10)).unwrap().is_none());

    tx.commit().unwrap();
    assert_eq!(other.find("city is \"Stavanger\"").unwrap().len(), 2);
    assert_eq!(other.count().unwrap(), 5);
}

#[test]
fn test_commit_is_atomic_across_collections() {
    let (_dir, db) = open_db();
    let mut tx = db.begin().unwrap();
    tx.insert("orders", json!({"_id": "o1", "total": 40})).unwrap();
    tx.insert("audit", json!({"order": "o1"})).unwrap();

    let before = db.committed_version();
    let version = tx.commit().unwrap();
    assert_eq!(version, before + 1);
    assert_eq!(tx.state(), TransactionState::Committed);
    assert_eq!(db.collection("orders").unwrap().count().unwrap(), 1);
    assert_eq!(db.collection("audit").unwrap().count().unwrap(), 1);
}

#[test]
fn test_rollback_discards_everything() {
    let (_dir, db) = seeded_db();
    let mut tx = db.begin().unwrap();
    tx.delete("users", "age > 0").unwrap();
    assert_eq!(tx.count("users").unwrap(), 0);
    tx.rollback().unwrap();
    tx.rollback().unwrap();

    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(db.collection("users").unwrap().count().unwrap(), 5);
    assert_eq!(db.active_transactions(), 0);
}

#[test]
fn test_terminal_transaction_rejects_operations() {
    let (_dir, db) = seeded_db();
    let mut tx = db.begin().unwrap();
    tx.commit().unwrap();

    let err = tx.insert("users", json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InactiveTransaction);
    assert!(matches!(tx.count("users"), Err(DocVaultError::InactiveTransaction)));
    assert!(matches!(tx.commit(), Err(DocVaultError::InactiveTransaction)));
}

#[test]
fn test_empty_commit_does_not_advance_version() {
    let (_dir, db) = seeded_db();
    let before = db.committed_version();
    let mut tx = db.begin().unwrap();
    tx.count("users").unwrap();
    tx.commit().unwrap();
    assert_eq!(db.committed_version(), before);
}

/// Catalog changes are not versioned: an open snapshot loses a dropped
/// collection at once and follows a rename to the new name
#[test]
fn test_open_snapshot_sees_catalog_changes_immediately() {
    let (_dir, db) = seeded_db();
    db.collection("logs").unwrap().insert(json!({"_id": 1})).unwrap();
    let reader = db.begin().unwrap();

    db.drop_collection("logs").unwrap();
    assert_eq!(reader.count("logs").unwrap(), 0);
    assert!(reader.find_by_id("logs", &DocumentId::Int(1)).unwrap().is_none());

    db.rename_collection("users", "people").unwrap();
    assert_eq!(reader.count("users").unwrap(), 0);
    assert_eq!(reader.count("people").unwrap(), 5);
    assert_eq!(
        reader.find_by_id("people", &DocumentId::Int(1)).unwrap().unwrap()["name"],
        "Alice"
    );
}

// =============================================================================
// CONFLICTS
// =============================================================================

#[test]
fn test_write_write_conflict_first_committer_wins() {
    let (_dir, db) = seeded_db();
    let mut first = db.begin().unwrap();
    let mut second = db.begin().unwrap();

    first
        .update_by_id("users", &DocumentId::Int(1), &json!({"age": 31}))
        .unwrap();
    second
        .update_by_id("users", &DocumentId::Int(1), &json!({"age": 99}))
        .unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(second.state(), TransactionState::RolledBack);

    let alice = db
        .collection("users")
        .unwrap()
        .find_by_id(&DocumentId::Int(1))
        .unwrap()
        .unwrap();
    assert_eq!(alice["age"], 31);
    assert_eq!(db.metrics().conflicts, 1);
}

#[test]
fn test_disjoint_writes_both_commit() {
    let (_dir, db) = seeded_db();
    let mut first = db.begin().unwrap();
    let mut second = db.begin().unwrap();
    first
        .update_by_id("users", &DocumentId::Int(1), &json!({"seen": true}))
        .unwrap();
    second
        .update_by_id("users", &DocumentId::Int(2), &json!({"seen": true}))
        .unwrap();
    first.commit().unwrap();
    second.commit().unwrap();

    let seen = db.collection("users").unwrap().find("seen").unwrap();
    assert_eq!(seen.len(), 2);
}

#[test]
fn test_delete_versus_update_conflicts() {
    let (_dir, db) = seeded_db();
    let mut deleter = db.begin().unwrap();
    let mut updater = db.begin().unwrap();
    deleter.delete_by_id("users", &DocumentId::Int(4)).unwrap();
    updater
        .update_by_id("users", &DocumentId::Int(4), &json!({"age": 26}))
        .unwrap();

    deleter.commit().unwrap();
    assert!(updater.commit().unwrap_err().is_conflict());
}

#[test]
fn test_concurrent_inserts_of_same_id_conflict() {
    let (_dir, db) = open_db();
    let mut first = db.begin().unwrap();
    let mut second = db.begin().unwrap();
    first.insert("c", json!({"_id": "k", "v": 1})).unwrap();
    second.insert("c", json!({"_id": "k", "v": 2})).unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

// =============================================================================
// RETRY
// =============================================================================

#[test]
fn test_run_with_retry_recovers_from_conflict() {
    let (_dir, db) = open_db();
    db.collection("counters")
        .unwrap()
        .insert(json!({"_id": "hits", "n": 0}))
        .unwrap();

    let attempts = AtomicU32::new(0);
    let id = DocumentId::from("hits");
    let value = db
        .run_with_retry(|tx| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let current = tx.find_by_id("counters", &id)?.unwrap_or_default();
            let n = current["n"].as_i64().unwrap_or(0);
            if attempt == 0 {
                // a competing writer commits after our snapshot was taken
                db.collection("counters")
                    .unwrap()
                    .update_by_id(&id, &json!({"n": 100}))
                    .unwrap();
            }
            tx.update_by_id("counters", &id, &json!({"n": n + 1}))?;
            Ok(n + 1)
        })
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(value, 101);
    assert_eq!(db.metrics().retries, 1);
}

#[test]
fn test_run_with_retry_gives_up_with_last_conflict() {
    let (_dir, db) = open_db();
    db.set_transaction_config(TransactionConfig::new().with_max_retries(2));
    db.collection("c").unwrap().insert(json!({"_id": 1})).unwrap();

    let attempts = AtomicU32::new(0);
    let err = db
        .run_with_retry(|tx| {
            attempts.fetch_add(1, Ordering::SeqCst);
            db.collection("c")
                .unwrap()
                .update_by_id(&DocumentId::Int(1), &json!({"bump": true}))
                .unwrap();
            tx.update_by_id("c", &DocumentId::Int(1), &json!({"mine": true}))
        })
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn test_run_with_retry_returns_other_errors_immediately() {
    let (_dir, db) = open_db();
    let attempts = AtomicU32::new(0);
    let err = db
        .run_with_retry(|tx| {
            attempts.fetch_add(1, Ordering::SeqCst);
            tx.update_by_id("c", &DocumentId::Int(404), &json!({"x": 1}))
        })
        .unwrap_err();
    assert!(matches!(err, DocVaultError::DocumentNotFound { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

// =============================================================================
// WRITE OPERATIONS
// =============================================================================

#[test]
fn test_upsert_by_id_and_filter() {
    let (_dir, db) = seeded_db();
    let mut tx = db.begin().unwrap();

    let updated = tx
        .upsert_by_id("users", &DocumentId::Int(1), json!({"age": 31}))
        .unwrap();
    assert!(!updated.was_inserted());

    let inserted = tx
        .upsert("users", "name is \"Grace\"", json!({"name": "Grace", "age": 28}))
        .unwrap();
    assert!(inserted.was_inserted());
    tx.commit().unwrap();

    let users = db.collection("users").unwrap();
    assert_eq!(users.count().unwrap(), 6);
    let grace = users.find_by_id(inserted.id()).unwrap().unwrap();
    assert_eq!(grace["name"], "Grace");
    let alice = users.find_by_id(&DocumentId::Int(1)).unwrap().unwrap();
    assert_eq!(alice["age"], 31);
    assert_eq!(alice["name"], "Alice");
}

#[test]
fn test_update_merges_and_keeps_id() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    users
        .update_by_id(&DocumentId::Int(2), &json!({"age": 18, "_id": 999}))
        .unwrap();
    let bob = users.find_by_id(&DocumentId::Int(2)).unwrap().unwrap();
    assert_eq!(bob["_id"], 2);
    assert_eq!(bob["age"], 18);
    assert_eq!(bob["city"], "Bergen");
}

#[test]
fn test_missing_document_errors() {
    let (_dir, db) = seeded_db();
    let users = db.collection("users").unwrap();
    let missing = DocumentId::Int(404);
    assert!(matches!(
        users.update_by_id(&missing, &json!({"x": 1})),
        Err(DocVaultError::DocumentNotFound { .. })
    ));
    assert!(matches!(
        users.delete_by_id(&missing),
        Err(DocVaultError::DocumentNotFound { .. })
    ));
    assert_eq!(users.update("age > 100", &json!({"x": 1})).unwrap(), 0);
    assert!(!users.delete_one("age > 100").unwrap());
}

#[test]
fn test_generated_ids_are_unique_strings() {
    let (_dir, db) = open_db();
    let notes = db.collection("notes").unwrap();
    let ids = notes
        .insert_many(vec![json!({"t": 1}), json!({"t": 2}), json!({"t": 3})])
        .unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| matches!(id, DocumentId::String(_))));
    assert_ne!(ids[0], ids[1]);

    let doc = notes.find_by_id(&ids[0]).unwrap().unwrap();
    assert_eq!(DocumentId::from_value(&doc["_id"]).unwrap(), ids[0]);
}

#[test]
fn test_transaction_metrics() {
    let (_dir, db) = open_db();
    let before = db.metrics();

    let mut tx = db.begin().unwrap();
    tx.insert("c", json!({"a": 1})).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin().unwrap();
    tx.insert("c", json!({"a": 2})).unwrap();
    tx.rollback().unwrap();

    let after = db.metrics();
    assert_eq!(after.transactions_begun - before.transactions_begun, 2);
    assert_eq!(after.transactions_committed - before.transactions_committed, 1);
    assert_eq!(after.transactions_aborted - before.transactions_aborted, 1);
    assert_eq!(after.documents_inserted - before.documents_inserted, 1);
}
