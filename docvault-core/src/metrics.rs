// src/metrics.rs
// Runtime counters
//
// All counters are monotonically increasing and updated with relaxed
// atomics; a snapshot is a best-effort point-in-time copy.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug)]
pub struct Metrics {
    started_at: DateTime<Utc>,

    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    conflicts: AtomicU64,
    retries: AtomicU64,

    documents_inserted: AtomicU64,
    documents_updated: AtomicU64,
    documents_deleted: AtomicU64,
    documents_read: AtomicU64,
    queries_executed: AtomicU64,

    wal_frames_written: AtomicU64,
    wal_bytes_written: AtomicU64,
    checkpoints: AtomicU64,
    auto_checkpoints: AtomicU64,
    gc_runs: AtomicU64,
    gc_versions_removed: AtomicU64,

    watch_events_delivered: AtomicU64,
    watch_callback_failures: AtomicU64,

    filter_cache_hits: AtomicU64,
    filter_cache_misses: AtomicU64,
}

/// Serializable copy of every counter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,

    pub transactions_begun: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub conflicts: u64,
    pub retries: u64,

    pub documents_inserted: u64,
    pub documents_updated: u64,
    pub documents_deleted: u64,
    pub documents_read: u64,
    pub queries_executed: u64,

    pub wal_frames_written: u64,
    pub wal_bytes_written: u64,
    pub checkpoints: u64,
    pub auto_checkpoints: u64,
    pub gc_runs: u64,
    pub gc_versions_removed: u64,

    pub watch_events_delivered: u64,
    pub watch_callback_failures: u64,

    pub filter_cache_hits: u64,
    pub filter_cache_misses: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            started_at: Utc::now(),
            transactions_begun: AtomicU64::new(0),
            transactions_committed: AtomicU64::new(0),
            transactions_aborted: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            documents_inserted: AtomicU64::new(0),
            documents_updated: AtomicU64::new(0),
            documents_deleted: AtomicU64::new(0),
            documents_read: AtomicU64::new(0),
            queries_executed: AtomicU64::new(0),
            wal_frames_written: AtomicU64::new(0),
            wal_bytes_written: AtomicU64::new(0),
            checkpoints: AtomicU64::new(0),
            auto_checkpoints: AtomicU64::new(0),
            gc_runs: AtomicU64::new(0),
            gc_versions_removed: AtomicU64::new(0),
            watch_events_delivered: AtomicU64::new(0),
            watch_callback_failures: AtomicU64::new(0),
            filter_cache_hits: AtomicU64::new(0),
            filter_cache_misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_begin(&self) {
        bump(&self.transactions_begun, 1);
    }

    pub(crate) fn record_commit(&self, inserted: u64, updated: u64, deleted: u64) {
        bump(&self.transactions_committed, 1);
        bump(&self.documents_inserted, inserted);
        bump(&self.documents_updated, updated);
        bump(&self.documents_deleted, deleted);
    }

    pub(crate) fn record_abort(&self) {
        bump(&self.transactions_aborted, 1);
    }

    pub(crate) fn record_conflict(&self) {
        bump(&self.conflicts, 1);
    }

    pub(crate) fn record_retry(&self) {
        bump(&self.retries, 1);
    }

    pub(crate) fn record_reads(&self, documents: u64) {
        bump(&self.documents_read, documents);
    }

    pub(crate) fn record_query(&self) {
        bump(&self.queries_executed, 1);
    }

    pub(crate) fn record_wal_write(&self, bytes: u64) {
        bump(&self.wal_frames_written, 1);
        bump(&self.wal_bytes_written, bytes);
    }

    pub(crate) fn record_checkpoint(&self, auto: bool) {
        if auto {
            bump(&self.auto_checkpoints, 1);
        } else {
            bump(&self.checkpoints, 1);
        }
    }

    pub(crate) fn record_gc(&self, versions_removed: u64) {
        bump(&self.gc_runs, 1);
        bump(&self.gc_versions_removed, versions_removed);
    }

    pub(crate) fn record_watch_delivery(&self) {
        bump(&self.watch_events_delivered, 1);
    }

    pub(crate) fn record_watch_failure(&self) {
        bump(&self.watch_callback_failures, 1);
    }

    pub(crate) fn record_cache_hit(&self) {
        bump(&self.filter_cache_hits, 1);
    }

    pub(crate) fn record_cache_miss(&self) {
        bump(&self.filter_cache_misses, 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            transactions_begun: load(&self.transactions_begun),
            transactions_committed: load(&self.transactions_committed),
            transactions_aborted: load(&self.transactions_aborted),
            conflicts: load(&self.conflicts),
            retries: load(&self.retries),
            documents_inserted: load(&self.documents_inserted),
            documents_updated: load(&self.documents_updated),
            documents_deleted: load(&self.documents_deleted),
            documents_read: load(&self.documents_read),
            queries_executed: load(&self.queries_executed),
            wal_frames_written: load(&self.wal_frames_written),
            wal_bytes_written: load(&self.wal_bytes_written),
            checkpoints: load(&self.checkpoints),
            auto_checkpoints: load(&self.auto_checkpoints),
            gc_runs: load(&self.gc_runs),
            gc_versions_removed: load(&self.gc_versions_removed),
            watch_events_delivered: load(&self.watch_events_delivered),
            watch_callback_failures: load(&self.watch_callback_failures),
            filter_cache_hits: load(&self.filter_cache_hits),
            filter_cache_misses: load(&self.filter_cache_misses),
        }
    }
}
