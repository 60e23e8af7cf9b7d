// src/database.rs
// Database handle: open/recovery, commit pipeline, catalog and maintenance
//
// Locking discipline:
// - `commit` (mutex) serializes everything that advances the committed
//   version: document commits, catalog changes and checkpoints. WAL
//   appends happen under it.
// - `collections` (rwlock) guards the in-memory state. Writers take it
//   only briefly to apply an already logged change; the committed version
//   is published while it is held, so a reader holding it sees a state and
//   version that agree.
// - `active` maps transaction ids to snapshot versions; `begin` registers
//   under the collections read lock so garbage collection never misses a
//   starting snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{self, Collections};
use crate::collection::{validate_collection_name, Collection};
use crate::config::{DatabaseOptions, TransactionConfig};
use crate::document::DocumentId;
use crate::error::{DocVaultError, Result};
use crate::index::{IndexDefinition, IndexKey};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::mvcc::CollectionState;
use crate::query::Filter;
use crate::query_cache::FilterCache;
use crate::stats::{CheckpointStats, CollectionInfo, DatabaseInfo, GarbageCollectionStats, IndexInfo};
use crate::storage::backup::{self, BackupInfo};
use crate::storage::{self as store, FORMAT_VERSION};
use crate::transaction::{PendingWrite, Transaction, WriteSet};
use crate::wal::{
    read_log, CatalogChange, CommitRecord, DocumentChange, FramePayload, WALFrame, WriteAheadLog,
};
use crate::watch::{ChangeEvent, ChangeOperation, WatchMessage, WatchRegistry};

struct CommitState {
    /// `None` when opened read-only
    wal: Option<WriteAheadLog>,
    frame_count: u64,
}

pub(crate) struct DatabaseInner {
    path: PathBuf,
    options: DatabaseOptions,
    tx_config: RwLock<TransactionConfig>,
    auto_checkpoint_threshold: AtomicU64,

    collections: RwLock<Collections>,
    committed_version: AtomicU64,
    commit: Mutex<CommitState>,

    /// Active transaction id -> snapshot version
    active: DashMap<u64, u64>,
    next_tx_id: AtomicU64,

    filter_cache: FilterCache,
    watchers: Arc<WatchRegistry>,
    metrics: Arc<Metrics>,
    closed: AtomicBool,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        if let Some(wal) = self.commit.get_mut().wal.as_mut() {
            let _ = wal.flush();
        }
    }
}

/// Shared handle to an open database
///
/// Cloning is cheap; every clone, [`Collection`] and [`Transaction`]
/// refers to the same state. After [`close`](Database::close) every handle
/// fails with `DatabaseClosed`.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("committed_version", &self.committed_version())
            .finish()
    }
}

impl Database {
    /// Open or create the database at `path` with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, DatabaseOptions::default())
    }

    /// Open or create the database at `path`.
    ///
    /// Loads the primary store, then replays every intact WAL frame newer
    /// than it. A torn tail left by a crash is truncated.
    pub fn open_with_options(path: impl AsRef<Path>, options: DatabaseOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();

        let mut collections = Collections::new();
        let mut version = 0;
        if let Some((_, snapshot)) = store::read_snapshot(&path)? {
            version = snapshot.version;
            for collection in snapshot.collections {
                let state = catalog::load(collection, version)?;
                collections.insert(state.name.clone(), state);
            }
        }

        let wal_path = store::wal_path(&path);
        let log = read_log(&wal_path, version)?;
        let frame_count = (log.frames.len() + log.skipped) as u64;

        for frame in &log.frames {
            let corrupt = |e: DocVaultError| {
                DocVaultError::WALCorruption(format!("frame {}: {}", frame.version, e))
            };
            match frame.payload().map_err(corrupt)? {
                FramePayload::Commit(record) => replay_commit(&mut collections, frame.version, record),
                FramePayload::Catalog(change) => {
                    let compiled = catalog::check(&collections, &change).map_err(corrupt)?;
                    catalog::install(&mut collections, change, compiled, frame.version)
                        .map_err(corrupt)?;
                }
            }
            version = frame.version;
        }

        let wal = if options.read_only {
            None
        } else {
            let mut wal = WriteAheadLog::open(&wal_path, options.file_permissions)?;
            if log.torn() {
                warn!(
                    path = %wal_path.display(),
                    valid_len = log.valid_len,
                    file_len = log.file_len,
                    "truncating damaged WAL tail"
                );
                wal.truncate(log.valid_len)?;
            }
            Some(wal)
        };

        let metrics = Arc::new(Metrics::new());
        info!(
            path = %path.display(),
            version,
            collections = collections.len(),
            replayed = log.frames.len(),
            read_only = options.read_only,
            "database opened"
        );

        Ok(Database {
            inner: Arc::new(DatabaseInner {
                tx_config: RwLock::new(TransactionConfig::default()),
                auto_checkpoint_threshold: AtomicU64::new(options.auto_checkpoint_threshold),
                collections: RwLock::new(collections),
                committed_version: AtomicU64::new(version),
                commit: Mutex::new(CommitState { wal, frame_count }),
                active: DashMap::new(),
                next_tx_id: AtomicU64::new(1),
                filter_cache: FilterCache::new(options.cache_size, Arc::clone(&metrics)),
                watchers: Arc::new(WatchRegistry::new()),
                metrics,
                closed: AtomicBool::new(false),
                path,
                options,
            }),
        })
    }

    // ========== Accessors ==========

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    pub fn committed_version(&self) -> u64 {
        self.inner.committed_version.load(Ordering::SeqCst)
    }

    /// Frames currently in the WAL
    pub fn frame_count(&self) -> u64 {
        self.inner.commit.lock().frame_count
    }

    pub fn active_transactions(&self) -> usize {
        self.inner.active.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn transaction_config(&self) -> TransactionConfig {
        *self.inner.tx_config.read()
    }

    pub fn set_transaction_config(&self, config: TransactionConfig) {
        *self.inner.tx_config.write() = config;
    }

    pub fn auto_checkpoint_threshold(&self) -> u64 {
        self.inner.auto_checkpoint_threshold.load(Ordering::Relaxed)
    }

    /// Frame count that triggers an automatic checkpoint (0 disables)
    pub fn set_auto_checkpoint_threshold(&self, threshold: u64) {
        self.inner
            .auto_checkpoint_threshold
            .store(threshold, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DocVaultError::DatabaseClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.inner.options.read_only {
            return Err(DocVaultError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn compile_filter(&self, src: &str) -> Result<Arc<Filter>> {
        self.inner.filter_cache.get_or_parse(src)
    }

    pub(crate) fn watch_registry(&self) -> Arc<WatchRegistry> {
        Arc::clone(&self.inner.watchers)
    }

    pub(crate) fn metrics_handle(&self) -> Arc<Metrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub(crate) fn collections_read(&self) -> RwLockReadGuard<'_, Collections> {
        self.inner.collections.read()
    }

    // ========== Transactions ==========

    /// Start a transaction reading the current committed version
    pub fn begin(&self) -> Result<Transaction> {
        self.ensure_open()?;
        let id = self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed);
        let snapshot = {
            let _state = self.inner.collections.read();
            let snapshot = self.committed_version();
            self.inner.active.insert(id, snapshot);
            snapshot
        };
        self.inner.metrics.record_begin();
        Ok(Transaction::new(self.clone(), id, snapshot))
    }

    pub(crate) fn release_transaction(&self, id: u64) {
        self.inner.active.remove(&id);
    }

    /// Run `work` in a transaction and commit it, retrying on conflict.
    ///
    /// Between attempts the caller's thread sleeps with exponential backoff
    /// (see [`TransactionConfig::backoff`]); no lock is held while it does.
    /// Any other error rolls back and is returned unchanged. When retries
    /// run out the last conflict is returned.
    ///
    /// ```no_run
    /// use docvault_core::{Database, DocumentId};
    /// use serde_json::json;
    ///
    /// # fn main() -> docvault_core::Result<()> {
    /// let db = Database::open("bank.db")?;
    /// db.run_with_retry(|tx| {
    ///     let from = DocumentId::from("alice");
    ///     let account = tx.find_by_id("accounts", &from)?.unwrap_or_default();
    ///     let balance = account["balance"].as_i64().unwrap_or(0);
    ///     tx.update_by_id("accounts", &from, &json!({"balance": balance - 10}))
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn run_with_retry<T, F>(&self, mut work: F) -> Result<T>
    where
        F: FnMut(&mut Transaction) -> Result<T>,
    {
        let config = self.transaction_config();
        let mut attempt = 0u32;
        loop {
            let mut tx = self.begin()?;
            let result = work(&mut tx).and_then(|value| {
                if tx.is_active() {
                    tx.commit()?;
                }
                Ok(value)
            });

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_conflict() && attempt < config.max_retries => {
                    tx.rollback()?;
                    drop(tx);
                    self.inner.metrics.record_retry();
                    let delay = config.backoff(attempt);
                    debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "retrying after conflict");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    let _ = tx.rollback();
                    return Err(e);
                }
            }
        }
    }

    /// Validate and apply a transaction's write set; returns the commit
    /// version
    pub(crate) fn commit_writes(&self, snapshot: u64, writes: WriteSet) -> Result<u64> {
        self.ensure_open()?;
        if writes.values().all(BTreeMap::is_empty) {
            return Ok(self.committed_version());
        }
        if self.inner.options.read_only {
            return Err(DocVaultError::ReadOnly);
        }

        let mut commit = self.inner.commit.lock();
        self.ensure_open()?;
        {
            let collections = self.inner.collections.read();
            for (name, docs) in &writes {
                validate_writes(collections.get(name), name, snapshot, docs)?;
            }
        }

        let committed = self.committed_version();
        let version = committed + 1;
        let (mut inserted, mut updated, mut deleted) = (0u64, 0u64, 0u64);
        let mut changes = Vec::new();
        for (name, docs) in &writes {
            for (id, write) in docs {
                match (write.existed, write.doc.is_some()) {
                    (false, false) => continue,
                    (false, true) => inserted += 1,
                    (true, true) => updated += 1,
                    (true, false) => deleted += 1,
                }
                changes.push(DocumentChange {
                    collection: name.clone(),
                    id: id.clone(),
                    document: write.doc.as_deref().cloned(),
                });
            }
        }
        if changes.is_empty() {
            return Ok(committed);
        }

        let frame = WALFrame::commit(version, &CommitRecord { changes })?;
        self.log_frame(&mut commit, &frame)?;

        let mut messages = Vec::new();
        {
            let mut collections = self.inner.collections.write();
            for (name, docs) in writes {
                let publish = self.inner.watchers.has_subscribers(&name);
                let state = collections
                    .entry(name.clone())
                    .or_insert_with(|| CollectionState::new(name.clone(), version));
                for (id, write) in docs {
                    if !write.existed && write.doc.is_none() {
                        continue;
                    }
                    if publish {
                        messages.push(change_message(state, &name, &id, &write, version));
                    }
                    state.apply(&id, version, write.doc);
                }
            }
            self.inner.committed_version.store(version, Ordering::SeqCst);
        }
        self.inner.watchers.publish(&messages);

        commit.frame_count += 1;
        let frames = commit.frame_count;
        drop(commit);

        self.inner.metrics.record_commit(inserted, updated, deleted);
        debug!(version, inserted, updated, deleted, "transaction committed");
        self.maybe_auto_checkpoint(frames);
        Ok(version)
    }

    /// Append `frame` to the WAL, cutting it back on failure
    fn log_frame(&self, commit: &mut CommitState, frame: &WALFrame) -> Result<()> {
        let wal = commit.wal.as_mut().ok_or(DocVaultError::ReadOnly)?;
        let before = wal.len();
        let written = wal.append(frame).and_then(|bytes| {
            if self.inner.options.durability.syncs_every_commit() {
                wal.flush()?;
            }
            Ok(bytes)
        });
        match written {
            Ok(bytes) => {
                self.inner.metrics.record_wal_write(bytes as u64);
                Ok(())
            }
            Err(e) => {
                if let Err(truncate) = wal.truncate(before) {
                    warn!(error = %truncate, "could not cut back WAL after failed append");
                }
                Err(e)
            }
        }
    }

    fn maybe_auto_checkpoint(&self, frames: u64) {
        let threshold = self.auto_checkpoint_threshold();
        if threshold == 0 || frames < threshold {
            return;
        }
        if let Err(e) = self.run_checkpoint(true) {
            warn!(error = %e, frames, "automatic checkpoint failed");
        }
    }

    // ========== Catalog ==========

    /// Log and apply a catalog change; takes effect immediately
    fn apply_catalog(&self, change: CatalogChange) -> Result<u64> {
        self.ensure_writable()?;
        let mut commit = self.inner.commit.lock();
        self.ensure_open()?;

        let compiled = {
            let collections = self.inner.collections.read();
            catalog::check(&collections, &change)?
        };
        let version = self.committed_version() + 1;
        self.log_frame(&mut commit, &WALFrame::catalog(version, &change)?)?;
        {
            let mut collections = self.inner.collections.write();
            catalog::install(&mut collections, change, compiled, version)?;
            self.inner.committed_version.store(version, Ordering::SeqCst);
        }

        commit.frame_count += 1;
        let frames = commit.frame_count;
        drop(commit);

        debug!(version, "catalog change committed");
        self.maybe_auto_checkpoint(frames);
        Ok(version)
    }

    /// Handle to `name`; the collection itself is created by its first
    /// write
    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.ensure_open()?;
        validate_collection_name(name)?;
        Ok(Collection::new(self.clone(), name.to_string()))
    }

    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        self.apply_catalog(CatalogChange::CreateCollection {
            name: name.to_string(),
        })?;
        Ok(Collection::new(self.clone(), name.to_string()))
    }

    /// Drop a collection with its indexes and schema
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.apply_catalog(CatalogChange::DropCollection {
            name: name.to_string(),
        })
        .map(|_| ())
    }

    /// Rename a collection, keeping its indexes and schema
    pub fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
        self.apply_catalog(CatalogChange::RenameCollection {
            from: from.to_string(),
            to: to.to_string(),
        })
        .map(|_| ())
    }

    /// Sorted names of every collection
    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.inner.collections.read().keys().cloned().collect())
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.inner.collections.read().contains_key(name)
    }

    /// Create and populate an index; fails when a unique index would be
    /// violated by existing documents
    pub fn create_index(&self, collection: &str, definition: IndexDefinition) -> Result<()> {
        self.apply_catalog(CatalogChange::CreateIndex {
            collection: collection.to_string(),
            definition,
        })
        .map(|_| ())
    }

    pub fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        self.apply_catalog(CatalogChange::DropIndex {
            collection: collection.to_string(),
            name: name.to_string(),
        })
        .map(|_| ())
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>> {
        self.with_collection(collection, |state| {
            state.index_definitions().iter().map(IndexInfo::from).collect()
        })
    }

    /// Install a schema; every live document must already satisfy it
    pub fn set_schema(&self, collection: &str, schema: &Value) -> Result<()> {
        self.apply_catalog(CatalogChange::SetSchema {
            collection: collection.to_string(),
            schema: schema.clone(),
        })
        .map(|_| ())
    }

    /// Source JSON of the collection's schema, if any
    pub fn get_schema(&self, collection: &str) -> Result<Option<Value>> {
        self.with_collection(collection, |state| {
            state.schema.as_ref().map(|s| s.source().clone())
        })
    }

    pub fn remove_schema(&self, collection: &str) -> Result<()> {
        self.apply_catalog(CatalogChange::RemoveSchema {
            collection: collection.to_string(),
        })
        .map(|_| ())
    }

    pub fn collection_stats(&self, collection: &str) -> Result<CollectionInfo> {
        let version = self.committed_version();
        self.with_collection(collection, |state| collection_info(state, version))
    }

    fn with_collection<T>(&self, name: &str, f: impl FnOnce(&CollectionState) -> T) -> Result<T> {
        self.ensure_open()?;
        let collections = self.inner.collections.read();
        let state = collections
            .get(name)
            .ok_or_else(|| DocVaultError::CollectionNotFound(name.to_string()))?;
        Ok(f(state))
    }

    pub fn info(&self) -> Result<DatabaseInfo> {
        self.ensure_open()?;
        let (wal_size, wal_frame_count) = {
            let commit = self.inner.commit.lock();
            let size = commit.wal.as_ref().map_or_else(
                || store::file_size(&store::wal_path(&self.inner.path)),
                WriteAheadLog::len,
            );
            (size, commit.frame_count)
        };

        let collections = self.inner.collections.read();
        let version = self.committed_version();
        let collections: Vec<CollectionInfo> = collections
            .values()
            .map(|state| collection_info(state, version))
            .collect();

        Ok(DatabaseInfo {
            path: self.inner.path.clone(),
            format_version: FORMAT_VERSION,
            committed_version: version,
            file_size: store::file_size(&self.inner.path),
            wal_size,
            wal_frame_count,
            total_documents: collections.iter().map(|c| c.document_count).sum(),
            collections,
            read_only: self.inner.options.read_only,
        })
    }

    // ========== Maintenance ==========

    /// Merge the WAL into the primary store and empty the log
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        self.run_checkpoint(false)
    }

    fn run_checkpoint(&self, auto: bool) -> Result<CheckpointStats> {
        self.ensure_writable()?;
        let mut commit = self.inner.commit.lock();

        let snapshot = {
            let collections = self.inner.collections.read();
            catalog::snapshot(&collections, self.committed_version())
        };
        // the snapshot rename is durable once this returns, so the log may go
        let file_size =
            store::write_snapshot(&self.inner.path, &snapshot, self.inner.options.file_permissions)?;
        if let Some(wal) = commit.wal.as_mut() {
            wal.clear()?;
        }
        let frames_merged = std::mem::take(&mut commit.frame_count);
        drop(commit);

        self.inner.metrics.record_checkpoint(auto);
        debug!(version = snapshot.version, frames_merged, file_size, auto, "checkpoint complete");
        Ok(CheckpointStats {
            version: snapshot.version,
            frames_merged,
            file_size,
        })
    }

    /// Write a self-contained copy of the committed state to `dest`
    pub fn backup(&self, dest: impl AsRef<Path>) -> Result<BackupInfo> {
        self.ensure_open()?;
        let dest = dest.as_ref();
        let snapshot = {
            let collections = self.inner.collections.read();
            catalog::snapshot(&collections, self.committed_version())
        };
        store::write_snapshot(dest, &snapshot, self.inner.options.file_permissions)?;
        info!(
            path = %dest.display(),
            version = snapshot.version,
            documents = snapshot.document_count(),
            "backup written"
        );
        backup::verify_backup(dest)
    }

    /// Inspect a backup file without opening it as a database
    pub fn verify_backup(path: impl AsRef<Path>) -> Result<BackupInfo> {
        backup::verify_backup(path.as_ref())
    }

    /// Copy a verified backup to `dest`, discarding any WAL there.
    ///
    /// `dest` must not be open.
    pub fn restore(backup: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<BackupInfo> {
        let (backup, dest) = (backup.as_ref(), dest.as_ref());
        let info = backup::verify_backup(backup)?;
        if !info.valid {
            return Err(DocVaultError::Corruption(format!(
                "backup {} is invalid: {}",
                backup.display(),
                info.errors.join("; ")
            )));
        }
        fs::copy(backup, dest)?;
        let wal = store::wal_path(dest);
        if wal.exists() {
            fs::remove_file(&wal)?;
        }
        store::sync_parent_dir(dest)?;
        info!(from = %backup.display(), to = %dest.display(), version = info.version, "backup restored");
        Ok(info)
    }

    /// Drop document versions no active snapshot can see, then rebuild the
    /// affected indexes
    pub fn garbage_collect(&self) -> Result<GarbageCollectionStats> {
        self.ensure_open()?;
        let mut collections = self.inner.collections.write();
        let horizon = self
            .inner
            .active
            .iter()
            .map(|entry| *entry.value())
            .min()
            .unwrap_or_else(|| self.committed_version());

        let mut stats = GarbageCollectionStats {
            horizon,
            active_transactions: self.inner.active.len(),
            ..GarbageCollectionStats::default()
        };
        for state in collections.values_mut() {
            stats.index_entries_before += state.indexes.entry_count();

            let mut removed = 0;
            for chain in state.docs.values_mut() {
                removed += chain.prune(horizon);
            }
            let before = state.docs.len();
            state.docs.retain(|_, chain| !chain.is_dead(horizon));
            let dead = before - state.docs.len();

            if removed + dead > 0 {
                state.rebuild_indexes();
            }
            stats.versions_removed += removed + dead;
            stats.documents_removed += dead;
            stats.index_entries_after += state.indexes.entry_count();
        }
        drop(collections);

        self.inner.metrics.record_gc(stats.versions_removed as u64);
        debug!(
            horizon,
            versions_removed = stats.versions_removed,
            documents_removed = stats.documents_removed,
            "garbage collection complete"
        );
        Ok(stats)
    }

    /// Sync the WAL, stop every watcher and invalidate all handles.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut commit = self.inner.commit.lock();
            if let Some(wal) = commit.wal.as_mut() {
                wal.flush()?;
            }
        }
        self.inner.watchers.close_all();
        self.inner.filter_cache.clear();
        info!(path = %self.inner.path.display(), "database closed");
        Ok(())
    }
}

fn replay_commit(collections: &mut Collections, version: u64, record: CommitRecord) {
    for change in record.changes {
        let state = collections
            .entry(change.collection.clone())
            .or_insert_with(|| CollectionState::new(change.collection, version));
        state.apply(&change.id, version, change.document.map(Arc::new));
    }
}

fn conflict(message: String) -> DocVaultError {
    DocVaultError::Conflict(message)
}

/// Commit-time checks of one collection's writes against the latest
/// committed state
fn validate_writes(
    state: Option<&CollectionState>,
    name: &str,
    snapshot: u64,
    docs: &BTreeMap<DocumentId, PendingWrite>,
) -> Result<()> {
    let Some(state) = state else {
        if docs.values().any(|w| w.existed) {
            return Err(conflict(format!("collection '{}' was dropped", name)));
        }
        return Ok(());
    };
    if state.created_version > snapshot && docs.values().any(|w| w.existed) {
        return Err(conflict(format!("collection '{}' was replaced", name)));
    }

    for id in docs.keys() {
        if let Some(chain) = state.docs.get(id) {
            if chain.latest_version() > snapshot {
                return Err(conflict(format!(
                    "document {}/{} was modified by a concurrent transaction",
                    name, id
                )));
            }
        }
    }

    if let Some(schema) = &state.schema {
        for write in docs.values() {
            if let Some(doc) = &write.doc {
                schema.validate(doc)?;
            }
        }
    }

    for index in state.indexes.unique_indexes() {
        let index_name = &index.definition().name;
        let mut keys: BTreeMap<IndexKey, &DocumentId> = BTreeMap::new();
        for (id, write) in docs {
            let Some(key) = write.doc.as_ref().and_then(|doc| index.unique_key(doc)) else {
                continue;
            };

            for other in index.lookup(&key) {
                if other == id || docs.contains_key(other) {
                    continue;
                }
                let Some(chain) = state.docs.get(other) else {
                    continue;
                };
                let taken = chain
                    .latest()
                    .map_or(false, |doc| index.unique_key(doc).as_ref() == Some(&key));
                if !taken {
                    continue;
                }
                if chain.latest_version() > snapshot {
                    return Err(conflict(format!(
                        "key {} of index '{}' was taken by a concurrent transaction",
                        key, index_name
                    )));
                }
                return Err(DocVaultError::UniqueViolation {
                    index: index_name.clone(),
                    key: key.to_string(),
                });
            }

            if keys.insert(key.clone(), id).is_some() {
                return Err(DocVaultError::UniqueViolation {
                    index: index_name.clone(),
                    key: key.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn change_message(
    state: &CollectionState,
    collection: &str,
    id: &DocumentId,
    write: &PendingWrite,
    version: u64,
) -> WatchMessage {
    let operation = match (write.existed, &write.doc) {
        (_, None) => ChangeOperation::Delete,
        (true, Some(_)) => ChangeOperation::Update,
        (false, Some(_)) => ChangeOperation::Insert,
    };
    WatchMessage {
        event: Arc::new(ChangeEvent {
            collection: collection.to_string(),
            operation,
            doc_id: id.clone(),
            document: write.doc.as_deref().cloned(),
            version,
        }),
        previous: state.docs.get(id).and_then(|chain| chain.latest()).cloned(),
    }
}

fn collection_info(state: &CollectionState, version: u64) -> CollectionInfo {
    CollectionInfo {
        name: state.name.clone(),
        document_count: state.count_visible(version),
        indexes: state
            .index_definitions()
            .iter()
            .map(IndexInfo::from)
            .collect(),
        has_schema: state.schema.is_some(),
    }
}
