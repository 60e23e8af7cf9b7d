// src/transaction.rs
// Snapshot-isolated transactions
//
// A transaction reads the committed state as of its snapshot version with
// its own buffered writes layered on top. Nothing is visible to other
// transactions until `commit`, which re-validates the write set under the
// commit lock (see `Database::commit_writes`).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::aggregation::Pipeline;
use crate::collection::validate_collection_name;
use crate::database::Database;
use crate::document::{document_size, merge_update, prepare_for_insert, with_id, DocumentId};
use crate::error::{DocVaultError, Result};
use crate::find_options::FindOptions;
use crate::mvcc::CollectionState;
use crate::query::{Filter, QueryBuilder, QueryPlan, QueryPlanner, QuerySource};
use crate::text_index::{tokenize, MatchMode, SearchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// Buffered write of one document; `doc: None` is a delete
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub doc: Option<Arc<Value>>,
    /// Whether the document was visible at the snapshot
    pub existed: bool,
}

pub(crate) type WriteSet = BTreeMap<String, BTreeMap<DocumentId, PendingWrite>>;

type UndoEntry = (String, DocumentId, Option<PendingWrite>);

/// Outcome of an upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertResult {
    Inserted(DocumentId),
    Updated(DocumentId),
}

impl UpsertResult {
    pub fn id(&self) -> &DocumentId {
        match self {
            UpsertResult::Inserted(id) | UpsertResult::Updated(id) => id,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, UpsertResult::Inserted(_))
    }
}

/// A unit of work against one [`Database`]
///
/// Dropping an active transaction rolls it back.
#[derive(Debug)]
pub struct Transaction {
    db: Database,
    id: u64,
    snapshot: u64,
    state: TransactionState,
    writes: WriteSet,
    /// Undo log of the innermost `atomic` call, if any
    undo: Option<Vec<UndoEntry>>,
}

impl Transaction {
    pub(crate) fn new(db: Database, id: u64, snapshot: u64) -> Self {
        Transaction {
            db,
            id,
            snapshot,
            state: TransactionState::Active,
            writes: WriteSet::new(),
            undo: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Committed version this transaction reads at
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Number of documents with a buffered write
    pub fn pending_writes(&self) -> usize {
        self.writes.values().map(BTreeMap::len).sum()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========== Lifecycle ==========

    /// Apply every buffered write atomically; returns the commit version.
    ///
    /// On any failure, including a conflict, the transaction is left rolled
    /// back.
    pub fn commit(&mut self) -> Result<u64> {
        self.ensure_active()?;
        let writes = std::mem::take(&mut self.writes);
        self.undo = None;
        let result = self.db.commit_writes(self.snapshot, writes);
        self.db.release_transaction(self.id);

        let metrics = self.db.metrics_handle();
        match &result {
            Ok(_) => self.state = TransactionState::Committed,
            Err(e) => {
                self.state = TransactionState::RolledBack;
                if e.is_conflict() {
                    metrics.record_conflict();
                }
                metrics.record_abort();
            }
        }
        result
    }

    /// Discard buffered writes; a no-op once the transaction is terminal
    pub fn rollback(&mut self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        if !self.writes.is_empty() {
            self.db.metrics_handle().record_abort();
        }
        self.writes.clear();
        self.undo = None;
        self.state = TransactionState::RolledBack;
        self.db.release_transaction(self.id);
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(DocVaultError::InactiveTransaction);
        }
        self.db.ensure_open()
    }

    fn ensure_writable(&self, collection: &str) -> Result<()> {
        self.ensure_active()?;
        if self.db.options().read_only {
            return Err(DocVaultError::ReadOnly);
        }
        validate_collection_name(collection)
    }

    /// Run `f` so that a failure restores the write set to its state before
    /// the call
    pub(crate) fn atomic<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let outer = self.undo.replace(Vec::new());
        let result = f(self);
        let log = std::mem::replace(&mut self.undo, outer).unwrap_or_default();

        match result {
            Ok(value) => {
                if let Some(outer) = &mut self.undo {
                    outer.extend(log);
                }
                Ok(value)
            }
            Err(e) => {
                for (collection, id, previous) in log.into_iter().rev() {
                    self.restore(collection, id, previous);
                }
                Err(e)
            }
        }
    }

    fn restore(&mut self, collection: String, id: DocumentId, previous: Option<PendingWrite>) {
        match previous {
            Some(write) => {
                self.writes.entry(collection).or_default().insert(id, write);
            }
            None => {
                if let Some(pending) = self.writes.get_mut(&collection) {
                    pending.remove(&id);
                    if pending.is_empty() {
                        self.writes.remove(&collection);
                    }
                }
            }
        }
    }

    // ========== Reads ==========

    /// Committed document visible at the snapshot, ignoring own writes
    fn committed(&self, collection: &str, id: &DocumentId) -> Option<Arc<Value>> {
        let collections = self.db.collections_read();
        collections
            .get(collection)
            .and_then(|state| state.visible(id, self.snapshot))
            .cloned()
    }

    /// Document as this transaction sees it
    fn current(&self, collection: &str, id: &DocumentId) -> Option<Arc<Value>> {
        match self.writes.get(collection).and_then(|pending| pending.get(id)) {
            Some(write) => write.doc.clone(),
            None => self.committed(collection, id),
        }
    }

    /// Visit visible documents matching `filter` in id order until `visit`
    /// returns false.
    ///
    /// Index candidates are widened with this transaction's own writes and
    /// every candidate is re-checked against the filter.
    pub(crate) fn scan(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        visit: &mut dyn FnMut(&DocumentId, &Arc<Value>) -> bool,
    ) -> Result<()> {
        self.ensure_active()?;
        let collections = self.db.collections_read();
        let state = collections.get(collection);
        let pending = self.writes.get(collection);

        let resolve = |id: &DocumentId| -> Option<&Arc<Value>> {
            match pending.and_then(|p| p.get(id)) {
                Some(write) => write.doc.as_ref(),
                None => state.and_then(|s| s.visible(id, self.snapshot)),
            }
        };

        let mut visited = 0u64;
        let mut offer = |id: &DocumentId| -> bool {
            match resolve(id) {
                Some(doc) if filter.map_or(true, |f| f.matches(doc)) => {
                    visited += 1;
                    visit(id, doc)
                }
                _ => true,
            }
        };

        let candidates = state.and_then(|s| QueryPlanner::plan(filter, &s.indexes).candidates(&s.indexes));
        match candidates {
            Some(mut ids) => {
                if let Some(pending) = pending {
                    ids.extend(pending.keys().cloned());
                }
                for id in &ids {
                    if !offer(id) {
                        break;
                    }
                }
            }
            None => {
                let mut committed = state.map(|s| s.docs.keys()).into_iter().flatten().peekable();
                let mut own = pending.map(|p| p.keys()).into_iter().flatten().peekable();
                loop {
                    let next = match (committed.peek(), own.peek()) {
                        (None, None) => break,
                        (Some(_), None) => committed.next(),
                        (None, Some(_)) => own.next(),
                        (Some(a), Some(b)) => match a.cmp(b) {
                            CmpOrdering::Less => committed.next(),
                            CmpOrdering::Greater => own.next(),
                            CmpOrdering::Equal => {
                                committed.next();
                                own.next()
                            }
                        },
                    };
                    let Some(id) = next else { break };
                    if !offer(id) {
                        break;
                    }
                }
            }
        }

        let metrics = self.db.metrics_handle();
        metrics.record_reads(visited);
        if filter.is_some() {
            metrics.record_query();
        }
        Ok(())
    }

    /// Plan a filter over the collection's committed indexes
    pub(crate) fn plan(&self, collection: &str, filter: Option<&Filter>) -> Result<QueryPlan> {
        self.ensure_active()?;
        let collections = self.db.collections_read();
        Ok(match collections.get(collection) {
            Some(state) => QueryPlanner::plan(filter, &state.indexes),
            None => QueryPlan::FullScan,
        })
    }

    fn matching(
        &self,
        collection: &str,
        filter: &str,
        limit: Option<usize>,
    ) -> Result<Vec<(DocumentId, Arc<Value>)>> {
        let filter = self.db.compile_filter(filter)?;
        let limit = limit.unwrap_or(usize::MAX);
        let mut found = Vec::new();
        if limit == 0 {
            return Ok(found);
        }
        self.scan(collection, Some(&filter), &mut |id, doc| {
            found.push((id.clone(), Arc::clone(doc)));
            found.len() < limit
        })?;
        Ok(found)
    }

    pub fn find_by_id(&self, collection: &str, id: &DocumentId) -> Result<Option<Value>> {
        self.ensure_active()?;
        let doc = self.current(collection, id);
        if doc.is_some() {
            self.db.metrics_handle().record_reads(1);
        }
        Ok(doc.map(|doc| (*doc).clone()))
    }

    pub fn find_by_id_typed<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<T>> {
        match self.find_by_id(collection, id)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Every visible document in id order
    pub fn find_all(&self, collection: &str) -> Result<Vec<Value>> {
        let mut docs = Vec::new();
        self.scan(collection, None, &mut |_, doc| {
            docs.push((**doc).clone());
            true
        })?;
        Ok(docs)
    }

    pub fn find_all_typed<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.query(collection).all_typed()
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let mut count = 0;
        self.scan(collection, None, &mut |_, _| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    pub fn find(&self, collection: &str, filter: &str) -> Result<Vec<Value>> {
        self.query(collection).filter(filter).all()
    }

    pub fn find_with_options(
        &self,
        collection: &str,
        filter: &str,
        options: FindOptions,
    ) -> Result<Vec<Value>> {
        self.query(collection).filter(filter).options(options).all()
    }

    pub fn find_typed<T: DeserializeOwned>(&self, collection: &str, filter: &str) -> Result<Vec<T>> {
        self.query(collection).filter(filter).all_typed()
    }

    pub fn find_one(&self, collection: &str, filter: &str) -> Result<Option<Value>> {
        self.query(collection).filter(filter).first()
    }

    /// Fluent query over this transaction's view of `collection`
    pub fn query(&self, collection: &str) -> QueryBuilder<TxQuery<'_>> {
        QueryBuilder::new(TxQuery {
            tx: self,
            collection: collection.to_string(),
        })
    }

    pub fn distinct(&self, collection: &str, field: &str) -> Result<Vec<Value>> {
        self.query(collection).distinct(field)
    }

    pub fn count_distinct(&self, collection: &str, field: &str) -> Result<usize> {
        self.query(collection).count_distinct(field)
    }

    /// Documents containing every term of `text`, best match first
    pub fn search(&self, collection: &str, text: &str) -> Result<Vec<SearchResult>> {
        self.text_search(collection, text, MatchMode::All)
    }

    /// Documents containing any term of `text`, best match first
    pub fn search_any(&self, collection: &str, text: &str) -> Result<Vec<SearchResult>> {
        self.text_search(collection, text, MatchMode::Any)
    }

    fn text_search(&self, collection: &str, text: &str, mode: MatchMode) -> Result<Vec<SearchResult>> {
        let terms = tokenize(text);

        let collections = self.db.collections_read();
        let index = collections
            .get(collection)
            .and_then(|state| state.indexes.text_index())
            .ok_or_else(|| {
                DocVaultError::IndexNotFound(format!("text index on '{}'", collection))
            })?;

        let mut ids = index.candidates(&terms);
        let pending = self.writes.get(collection);
        if let Some(pending) = pending {
            ids.extend(pending.keys().cloned());
        }
        let state = collections.get(collection);

        let docs: Vec<(DocumentId, Arc<Value>)> = ids
            .into_iter()
            .filter_map(|id| {
                let doc = match pending.and_then(|p| p.get(&id)) {
                    Some(write) => write.doc.clone(),
                    None => state.and_then(|s| s.visible(&id, self.snapshot)).cloned(),
                };
                doc.map(|doc| (id, doc))
            })
            .collect();

        // corpus size for IDF: latest committed count adjusted by own writes
        let mut total = state.map_or(0, CollectionState::live_count);
        for write in pending.into_iter().flat_map(BTreeMap::values) {
            match (write.existed, write.doc.is_some()) {
                (false, true) => total += 1,
                (true, false) => total = total.saturating_sub(1),
                _ => {}
            }
        }
        let results = index.rank(&terms, docs, total, mode);
        drop(collections);

        let metrics = self.db.metrics_handle();
        metrics.record_query();
        metrics.record_reads(results.len() as u64);
        Ok(results)
    }

    /// Run an aggregation pipeline over the collection.
    ///
    /// A leading match stage narrows the scan through the planner.
    pub fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Value>> {
        let docs = match pipeline.leading_match() {
            Some(filter) => self.find(collection, filter)?,
            None => self.find_all(collection)?,
        };
        pipeline.execute(docs)
    }

    // ========== Writes ==========

    /// Buffer `doc` (or a delete) for `id` after size, schema and unique
    /// checks
    fn stage(&mut self, collection: &str, id: DocumentId, doc: Option<Value>) -> Result<()> {
        if let Some(doc) = &doc {
            self.check_document(collection, &id, doc)?;
        }

        let previous = self
            .writes
            .get(collection)
            .and_then(|pending| pending.get(&id))
            .cloned();
        let existed = match &previous {
            Some(write) => write.existed,
            None => self.committed(collection, &id).is_some(),
        };

        if let Some(undo) = &mut self.undo {
            undo.push((collection.to_string(), id.clone(), previous));
        }
        self.writes.entry(collection.to_string()).or_default().insert(
            id,
            PendingWrite {
                doc: doc.map(Arc::new),
                existed,
            },
        );
        Ok(())
    }

    fn check_document(&self, collection: &str, id: &DocumentId, doc: &Value) -> Result<()> {
        let limit = self.db.options().max_document_size;
        let size = document_size(doc)?;
        if size > limit {
            return Err(DocVaultError::DocumentTooLarge { size, limit });
        }

        let collections = self.db.collections_read();
        let Some(state) = collections.get(collection) else {
            return Ok(());
        };
        if let Some(schema) = &state.schema {
            schema.validate(doc)?;
        }
        self.check_unique(state, collection, id, doc)
    }

    /// Unique keys of `doc` must not appear on any other document this
    /// transaction can see
    fn check_unique(
        &self,
        state: &CollectionState,
        collection: &str,
        id: &DocumentId,
        doc: &Value,
    ) -> Result<()> {
        let pending = self.writes.get(collection);
        for index in state.indexes.unique_indexes() {
            let Some(key) = index.unique_key(doc) else {
                continue;
            };
            let violation = || DocVaultError::UniqueViolation {
                index: index.definition().name.clone(),
                key: key.to_string(),
            };

            for other in index.lookup(&key) {
                if other == id {
                    continue;
                }
                let visible = match pending.and_then(|p| p.get(other)) {
                    Some(write) => write.doc.as_ref(),
                    None => state.visible(other, self.snapshot),
                };
                if visible.map_or(false, |d| index.unique_key(d).as_ref() == Some(&key)) {
                    return Err(violation());
                }
            }

            if let Some(pending) = pending {
                let clash = pending.iter().any(|(other, write)| {
                    other != id
                        && write
                            .doc
                            .as_ref()
                            .map_or(false, |d| index.unique_key(d).as_ref() == Some(&key))
                });
                if clash {
                    return Err(violation());
                }
            }
        }
        Ok(())
    }

    /// Insert a document, generating an `_id` when absent
    pub fn insert(&mut self, collection: &str, doc: Value) -> Result<DocumentId> {
        self.ensure_writable(collection)?;
        let (id, doc) = prepare_for_insert(doc)?;
        if self.current(collection, &id).is_some() {
            return Err(DocVaultError::UniqueViolation {
                index: "_id".to_string(),
                key: id.to_string(),
            });
        }
        self.stage(collection, id.clone(), Some(doc))?;
        Ok(id)
    }

    pub fn insert_typed<T: Serialize>(&mut self, collection: &str, value: &T) -> Result<DocumentId> {
        let doc = serde_json::to_value(value)?;
        self.insert(collection, doc)
    }

    /// Insert every document or none of them
    pub fn insert_many(&mut self, collection: &str, docs: Vec<Value>) -> Result<Vec<DocumentId>> {
        self.atomic(|tx| {
            docs.into_iter()
                .map(|doc| tx.insert(collection, doc))
                .collect()
        })
    }

    /// Merge `update` into the document with `id`
    pub fn update_by_id(&mut self, collection: &str, id: &DocumentId, update: &Value) -> Result<()> {
        self.ensure_writable(collection)?;
        let current = self
            .current(collection, id)
            .ok_or_else(|| not_found(collection, id))?;
        let merged = merge_update(&current, update)?;
        self.stage(collection, id.clone(), Some(merged))
    }

    pub fn delete_by_id(&mut self, collection: &str, id: &DocumentId) -> Result<()> {
        self.ensure_writable(collection)?;
        if self.current(collection, id).is_none() {
            return Err(not_found(collection, id));
        }
        self.stage(collection, id.clone(), None)
    }

    /// Merge `update` into every match; returns the number updated
    pub fn update(&mut self, collection: &str, filter: &str, update: &Value) -> Result<usize> {
        self.update_matching(collection, filter, update, None)
    }

    /// Merge `update` into the first match in id order
    pub fn update_one(&mut self, collection: &str, filter: &str, update: &Value) -> Result<bool> {
        Ok(self.update_matching(collection, filter, update, Some(1))? > 0)
    }

    fn update_matching(
        &mut self,
        collection: &str,
        filter: &str,
        update: &Value,
        limit: Option<usize>,
    ) -> Result<usize> {
        self.ensure_writable(collection)?;
        let targets = self.matching(collection, filter, limit)?;
        self.atomic(|tx| {
            for (id, doc) in &targets {
                let merged = merge_update(doc, update)?;
                tx.stage(collection, id.clone(), Some(merged))?;
            }
            Ok(targets.len())
        })
    }

    /// Delete every match; returns the number deleted
    pub fn delete(&mut self, collection: &str, filter: &str) -> Result<usize> {
        self.delete_matching(collection, filter, None)
    }

    pub fn delete_one(&mut self, collection: &str, filter: &str) -> Result<bool> {
        Ok(self.delete_matching(collection, filter, Some(1))? > 0)
    }

    fn delete_matching(&mut self, collection: &str, filter: &str, limit: Option<usize>) -> Result<usize> {
        self.ensure_writable(collection)?;
        let targets = self.matching(collection, filter, limit)?;
        self.atomic(|tx| {
            for (id, _) in &targets {
                tx.stage(collection, id.clone(), None)?;
            }
            Ok(targets.len())
        })
    }

    /// Merge `doc` into the document with `id`, or insert it under `id`
    pub fn upsert_by_id(&mut self, collection: &str, id: &DocumentId, doc: Value) -> Result<UpsertResult> {
        self.ensure_writable(collection)?;
        match self.current(collection, id) {
            Some(current) => {
                let merged = merge_update(&current, &doc)?;
                self.stage(collection, id.clone(), Some(merged))?;
                Ok(UpsertResult::Updated(id.clone()))
            }
            None => {
                let doc = with_id(doc, id)?;
                self.stage(collection, id.clone(), Some(doc))?;
                Ok(UpsertResult::Inserted(id.clone()))
            }
        }
    }

    /// Merge `doc` into the first match, or insert it when nothing matches
    pub fn upsert(&mut self, collection: &str, filter: &str, doc: Value) -> Result<UpsertResult> {
        self.ensure_writable(collection)?;
        match self.matching(collection, filter, Some(1))?.into_iter().next() {
            Some((id, current)) => {
                let merged = merge_update(&current, &doc)?;
                self.stage(collection, id.clone(), Some(merged))?;
                Ok(UpsertResult::Updated(id))
            }
            None => self.insert(collection, doc).map(UpsertResult::Inserted),
        }
    }
}

fn not_found(collection: &str, id: &DocumentId) -> DocVaultError {
    DocVaultError::DocumentNotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            let _ = self.rollback();
        }
    }
}

/// [`QuerySource`] over a transaction's view of one collection
pub struct TxQuery<'a> {
    tx: &'a Transaction,
    collection: String,
}

impl QuerySource for TxQuery<'_> {
    fn compile(&self, filter: &str) -> Result<Arc<Filter>> {
        self.tx.db.compile_filter(filter)
    }

    fn scan(&self, filter: Option<&Filter>, visit: &mut dyn FnMut(&Value) -> bool) -> Result<()> {
        self.tx.scan(&self.collection, filter, &mut |_, doc| visit(doc))
    }

    fn plan(&self, filter: Option<&Filter>) -> Result<QueryPlan> {
        self.tx.plan(&self.collection, filter)
    }
}
