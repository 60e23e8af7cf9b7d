// concurrent_tests.rs
// Stress tests under concurrent load
//
// These tests verify thread safety under heavy concurrent load:
// 1. No lost updates under retry
// 2. Readers always see a consistent snapshot
// 3. All operations complete without panic

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use common::open_db;
use docvault_core::{DocumentId, TransactionConfig};
use serde_json::json;

// =============================================================================
// CONCURRENT WRITERS
// =============================================================================

/// Test: Many threads inserting simultaneously
/// Expected: All documents inserted, correct count
#[test]
fn test_concurrent_inserts() {
    const NUM_THREADS: usize = 8;
    const DOCS_PER_THREAD: usize = 50;

    let (_dir, db) = open_db();
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let coll = db.collection("stress").unwrap();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..DOCS_PER_THREAD {
                    coll.insert(json!({"thread": thread_id, "seq": i}))
                        .expect("Insert should succeed");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic");
    }

    let coll = db.collection("stress").unwrap();
    assert_eq!(coll.count().unwrap(), NUM_THREADS * DOCS_PER_THREAD);
    assert_eq!(coll.count_distinct("_id").unwrap(), NUM_THREADS * DOCS_PER_THREAD);
}

/// Test: Read-modify-write of one counter from many threads
/// Expected: Conflicts are retried, no increment is lost
#[test]
fn test_counter_increments_not_lost() {
    const NUM_THREADS: usize = 6;
    const INCREMENTS: usize = 20;

    let (_dir, db) = open_db();
    db.set_transaction_config(
        TransactionConfig::new()
            .with_max_retries(1_000)
            .with_max_retry_backoff_ms(5),
    );
    db.collection("counters")
        .unwrap()
        .insert(json!({"_id": "c", "n": 0}))
        .unwrap();

    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let id = DocumentId::from("c");
                for _ in 0..INCREMENTS {
                    db.run_with_retry(|tx| {
                        let doc = tx.find_by_id("counters", &id)?.unwrap_or_default();
                        let n = doc["n"].as_i64().unwrap_or(0);
                        tx.update_by_id("counters", &id, &json!({"n": n + 1}))
                    })
                    .expect("increment should eventually commit");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic");
    }

    let doc = db
        .collection("counters")
        .unwrap()
        .find_by_id(&DocumentId::from("c"))
        .unwrap()
        .unwrap();
    assert_eq!(doc["n"], (NUM_THREADS * INCREMENTS) as i64);
    assert_eq!(db.active_transactions(), 0);
}

// =============================================================================
// READERS DURING WRITES
// =============================================================================

/// Test: Transfers between accounts while readers sum the balances
/// Expected: Every snapshot sees the same total
#[test]
fn test_snapshot_reads_see_consistent_totals() {
    const ACCOUNTS: i64 = 5;
    const TOTAL: i64 = ACCOUNTS * 100;

    let (_dir, db) = open_db();
    db.set_transaction_config(TransactionConfig::new().with_max_retries(1_000));
    let accounts = db.collection("accounts").unwrap();
    accounts
        .insert_many((0..ACCOUNTS).map(|i| json!({"_id": i, "balance": 100})).collect())
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let writers: Vec<_> = (0..3)
        .map(|w| {
            let db = db.clone();
            thread::spawn(move || {
                for round in 0..40i64 {
                    let from = DocumentId::Int((w + round) % ACCOUNTS);
                    let to = DocumentId::Int((w + round + 1) % ACCOUNTS);
                    db.run_with_retry(|tx| {
                        let a = tx.find_by_id("accounts", &from)?.unwrap_or_default();
                        let b = tx.find_by_id("accounts", &to)?.unwrap_or_default();
                        let (a, b) = (a["balance"].as_i64().unwrap_or(0), b["balance"].as_i64().unwrap_or(0));
                        tx.update_by_id("accounts", &from, &json!({"balance": a - 7}))?;
                        tx.update_by_id("accounts", &to, &json!({"balance": b + 7}))
                    })
                    .expect("transfer should commit");
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let db = db.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut checks = 0;
                while !stop.load(Ordering::Acquire) || checks == 0 {
                    let tx = db.begin().unwrap();
                    let total: i64 = tx
                        .find_all("accounts")
                        .unwrap()
                        .iter()
                        .map(|d| d["balance"].as_i64().unwrap_or(0))
                        .sum();
                    assert_eq!(total, TOTAL);
                    checks += 1;
                }
                checks
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("Writer should not panic");
    }
    stop.store(true, Ordering::Release);
    for reader in readers {
        assert!(reader.join().expect("Reader should not panic") > 0);
    }
}

/// Test: Garbage collection and checkpoints racing with writers
/// Expected: No panics, final state complete after reopen
#[test]
fn test_maintenance_during_writes() {
    let (dir, db) = open_db();
    let done = Arc::new(AtomicBool::new(false));

    let maintenance = {
        let db = db.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                db.garbage_collect().unwrap();
                db.checkpoint().unwrap();
            }
        })
    };

    let coll = db.collection("m").unwrap();
    for i in 0..200 {
        coll.insert(json!({"_id": i})).unwrap();
        if i % 10 == 0 {
            coll.update_by_id(&DocumentId::Int(i), &json!({"touched": true}))
                .unwrap();
        }
    }
    done.store(true, Ordering::Release);
    maintenance.join().expect("Maintenance should not panic");

    db.close().unwrap();
    drop(coll);
    drop(db);
    let db = docvault_core::Database::open(common::db_path(&dir)).unwrap();
    let coll = db.collection("m").unwrap();
    assert_eq!(coll.count().unwrap(), 200);
    assert_eq!(coll.find("touched").unwrap().len(), 20);
}
