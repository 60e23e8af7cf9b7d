// collection/mod.rs
// Collection handle: single-operation transactions over one collection
//
// Every write runs as its own transaction through `run_with_retry`; every
// read runs against a fresh snapshot. For multi-operation atomicity use
// `Database::begin` or `Database::run_with_retry` directly.

pub mod bulk;
pub mod schema;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::aggregation::Pipeline;
use crate::database::Database;
use crate::document::DocumentId;
use crate::error::{DocVaultError, Result};
use crate::find_options::FindOptions;
use crate::index::IndexDefinition;
use crate::query::{Filter, QueryBuilder, QueryPlan, QuerySource};
use crate::stats::{CollectionInfo, IndexInfo};
use crate::text_index::SearchResult;
use crate::transaction::{Transaction, UpsertResult};
use crate::watch::WatchBuilder;

use self::bulk::{BulkWrite, BulkWriteResult};

const MAX_NAME_LEN: usize = 64;
const RESERVED_NAMES: [&str; 3] = ["_metadata", "_internal", "_system"];

/// Check a collection name.
///
/// Names are 1 to 64 ASCII letters, digits or underscores, start with a
/// letter or underscore, and are not reserved.
///
/// ```
/// use docvault_core::collection::validate_collection_name;
///
/// assert!(validate_collection_name("users_2024").is_ok());
/// assert!(validate_collection_name("2users").is_err());
/// assert!(validate_collection_name("_system").is_err());
/// ```
pub fn validate_collection_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        DocVaultError::InvalidArgument(format!("invalid collection name '{}': {}", name, reason))
    };

    let Some(first) = name.chars().next() else {
        return Err(invalid("name is empty"));
    };
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("longer than 64 characters"));
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(invalid("must start with a letter or underscore"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("only letters, digits and underscores are allowed"));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(invalid("name is reserved"));
    }
    Ok(())
}

/// Handle to one collection of a [`Database`]
#[derive(Clone)]
pub struct Collection {
    db: Database,
    name: String,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}

impl Collection {
    pub(crate) fn new(db: Database, name: String) -> Self {
        Collection { db, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn read<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let tx = self.db.begin()?;
        f(&tx)
    }

    fn write<T>(&self, mut f: impl FnMut(&mut Transaction, &str) -> Result<T>) -> Result<T> {
        self.db.run_with_retry(|tx| f(tx, &self.name))
    }

    // ========== Writes ==========

    pub fn insert(&self, doc: Value) -> Result<DocumentId> {
        self.write(|tx, name| tx.insert(name, doc.clone()))
    }

    pub fn insert_typed<T: Serialize>(&self, value: &T) -> Result<DocumentId> {
        let doc = serde_json::to_value(value)?;
        self.insert(doc)
    }

    /// Insert all documents in one transaction, or none on failure
    pub fn insert_many(&self, docs: Vec<Value>) -> Result<Vec<DocumentId>> {
        self.write(|tx, name| tx.insert_many(name, docs.clone()))
    }

    pub fn update_by_id(&self, id: &DocumentId, update: &Value) -> Result<()> {
        self.write(|tx, name| tx.update_by_id(name, id, update))
    }

    pub fn delete_by_id(&self, id: &DocumentId) -> Result<()> {
        self.write(|tx, name| tx.delete_by_id(name, id))
    }

    pub fn update(&self, filter: &str, update: &Value) -> Result<usize> {
        self.write(|tx, name| tx.update(name, filter, update))
    }

    pub fn update_one(&self, filter: &str, update: &Value) -> Result<bool> {
        self.write(|tx, name| tx.update_one(name, filter, update))
    }

    pub fn delete(&self, filter: &str) -> Result<usize> {
        self.write(|tx, name| tx.delete(name, filter))
    }

    pub fn delete_one(&self, filter: &str) -> Result<bool> {
        self.write(|tx, name| tx.delete_one(name, filter))
    }

    pub fn upsert_by_id(&self, id: &DocumentId, doc: Value) -> Result<UpsertResult> {
        self.write(|tx, name| tx.upsert_by_id(name, id, doc.clone()))
    }

    pub fn upsert(&self, filter: &str, doc: Value) -> Result<UpsertResult> {
        self.write(|tx, name| tx.upsert(name, filter, doc.clone()))
    }

    /// Run a batch of operations in one transaction.
    ///
    /// Per-operation failures are reported in the result; successful
    /// operations are committed.
    pub fn bulk_write(&self, bulk: &BulkWrite) -> Result<BulkWriteResult> {
        self.write(|tx, name| tx.bulk_write(name, bulk))
    }

    // ========== Reads ==========

    pub fn find_by_id(&self, id: &DocumentId) -> Result<Option<Value>> {
        self.read(|tx| tx.find_by_id(&self.name, id))
    }

    pub fn find_by_id_typed<T: DeserializeOwned>(&self, id: &DocumentId) -> Result<Option<T>> {
        self.read(|tx| tx.find_by_id_typed(&self.name, id))
    }

    pub fn find_all(&self) -> Result<Vec<Value>> {
        self.read(|tx| tx.find_all(&self.name))
    }

    pub fn find_all_typed<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.read(|tx| tx.find_all_typed(&self.name))
    }

    pub fn count(&self) -> Result<usize> {
        self.read(|tx| tx.count(&self.name))
    }

    pub fn find(&self, filter: &str) -> Result<Vec<Value>> {
        self.read(|tx| tx.find(&self.name, filter))
    }

    pub fn find_with_options(&self, filter: &str, options: FindOptions) -> Result<Vec<Value>> {
        self.read(|tx| tx.find_with_options(&self.name, filter, options))
    }

    pub fn find_typed<T: DeserializeOwned>(&self, filter: &str) -> Result<Vec<T>> {
        self.read(|tx| tx.find_typed(&self.name, filter))
    }

    pub fn find_one(&self, filter: &str) -> Result<Option<Value>> {
        self.read(|tx| tx.find_one(&self.name, filter))
    }

    pub fn distinct(&self, field: &str) -> Result<Vec<Value>> {
        self.read(|tx| tx.distinct(&self.name, field))
    }

    pub fn count_distinct(&self, field: &str) -> Result<usize> {
        self.read(|tx| tx.count_distinct(&self.name, field))
    }

    pub fn search(&self, text: &str) -> Result<Vec<SearchResult>> {
        self.read(|tx| tx.search(&self.name, text))
    }

    pub fn search_any(&self, text: &str) -> Result<Vec<SearchResult>> {
        self.read(|tx| tx.search_any(&self.name, text))
    }

    pub fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Value>> {
        self.read(|tx| tx.aggregate(&self.name, pipeline))
    }

    /// Fluent query; each execution reads the latest committed state
    pub fn query(&self) -> QueryBuilder<CollectionQuery> {
        QueryBuilder::new(CollectionQuery {
            db: self.db.clone(),
            collection: self.name.clone(),
        })
    }

    /// Subscribe to committed changes of this collection
    pub fn watch(&self) -> WatchBuilder {
        WatchBuilder::new(self.db.clone(), self.name.clone())
    }

    // ========== Indexes, schema, stats ==========

    /// Single-field index named `<collection>_<field>`
    pub fn create_index(&self, field: &str, unique: bool) -> Result<String> {
        let name = format!("{}_{}", self.name, field);
        self.create_index_with(IndexDefinition::single(name.clone(), field, unique))?;
        Ok(name)
    }

    /// Compound index over `fields` in order, named
    /// `<collection>_<field1>_<field2>...`
    pub fn create_compound_index(&self, fields: &[&str], unique: bool) -> Result<String> {
        let name = format!("{}_{}", self.name, fields.join("_"));
        let fields = fields.iter().map(|f| f.to_string()).collect();
        self.create_index_with(IndexDefinition::compound(name.clone(), fields, unique))?;
        Ok(name)
    }

    /// Text index over string `fields`, named `<collection>_<fields>_text`
    pub fn create_text_index(&self, fields: &[&str]) -> Result<String> {
        let name = format!("{}_{}_text", self.name, fields.join("_"));
        let fields = fields.iter().map(|f| f.to_string()).collect();
        self.create_index_with(IndexDefinition::text(name.clone(), fields))?;
        Ok(name)
    }

    pub fn create_index_with(&self, definition: IndexDefinition) -> Result<()> {
        self.db.create_index(&self.name, definition)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.db.drop_index(&self.name, name)
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        self.db.list_indexes(&self.name)
    }

    pub fn set_schema(&self, schema: &Value) -> Result<()> {
        self.db.set_schema(&self.name, schema)
    }

    pub fn get_schema(&self) -> Result<Option<Value>> {
        self.db.get_schema(&self.name)
    }

    pub fn remove_schema(&self) -> Result<()> {
        self.db.remove_schema(&self.name)
    }

    pub fn stats(&self) -> Result<CollectionInfo> {
        self.db.collection_stats(&self.name)
    }
}

/// [`QuerySource`] reading the latest committed state of one collection
pub struct CollectionQuery {
    db: Database,
    collection: String,
}

impl QuerySource for CollectionQuery {
    fn compile(&self, filter: &str) -> Result<Arc<Filter>> {
        self.db.compile_filter(filter)
    }

    fn scan(&self, filter: Option<&Filter>, visit: &mut dyn FnMut(&Value) -> bool) -> Result<()> {
        let tx = self.db.begin()?;
        tx.scan(&self.collection, filter, &mut |_, doc| visit(doc))
    }

    fn plan(&self, filter: Option<&Filter>) -> Result<QueryPlan> {
        let tx = self.db.begin()?;
        tx.plan(&self.collection, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::find_options::SortOrder;
    use serde_json::json;

    #[test]
    fn test_collection_name_rules() {
        let longest = "x".repeat(64);
        let too_long = "x".repeat(65);
        for ok in ["users", "_private", "a1_b2", longest.as_str()] {
            assert!(validate_collection_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "1abc", "has-dash", "has space", "_metadata", "ünï", too_long.as_str()] {
            let err = validate_collection_name(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{}", bad);
        }
    }

    #[test]
    fn test_collection_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("c.db")).unwrap();
        let users = db.collection("users").unwrap();
        assert!(db.collection("bad name").is_err());

        let id = users.insert(json!({"name": "Alice", "age": 30})).unwrap();
        users.insert(json!({"name": "Bob", "age": 25})).unwrap();
        let doc = users.find_by_id(&id).unwrap().unwrap();
        assert_eq!(doc["name"], "Alice");

        let names: Vec<Value> = users
            .query()
            .sort_by("age", SortOrder::Ascending)
            .all()
            .unwrap()
            .into_iter()
            .map(|d| d["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("Bob"), json!("Alice")]);

        users.update_by_id(&id, &json!({"age": 31})).unwrap();
        assert_eq!(users.find_one("age > 30").unwrap().unwrap()["name"], "Alice");
        users.delete_by_id(&id).unwrap();
        assert_eq!(users.count().unwrap(), 1);
    }

    #[test]
    fn test_index_helpers_and_admin_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("c.db")).unwrap();
        let users = db.collection("users").unwrap();

        assert_eq!(users.stats().unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(users.create_index("email", true).unwrap(), "users_email");
        assert_eq!(
            users.create_compound_index(&["city", "age"], false).unwrap(),
            "users_city_age"
        );
        assert_eq!(users.create_text_index(&["bio"]).unwrap(), "users_bio_text");
        assert_eq!(users.list_indexes().unwrap().len(), 3);
        assert_eq!(
            users.create_index("email", false).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        users.drop_index("users_email").unwrap();
        assert_eq!(users.stats().unwrap().indexes.len(), 2);
    }
}
