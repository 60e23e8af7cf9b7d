// src/catalog.rs
// Catalog changes and snapshot conversion
//
// Catalog changes are applied in two steps so the same code serves live
// DDL and WAL replay: `check` validates against the current state without
// touching it, `install` applies a checked change at a commit version.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;

use crate::collection::schema::Schema;
use crate::collection::validate_collection_name;
use crate::document::{DocumentId, ID_FIELD};
use crate::error::{DocVaultError, Result};
use crate::index::{FieldIndex, IndexDefinition, IndexKind};
use crate::mvcc::CollectionState;
use crate::storage::{CollectionSnapshot, SnapshotData};
use crate::wal::CatalogChange;

pub(crate) type Collections = BTreeMap<String, CollectionState>;

fn existing<'a>(collections: &'a Collections, name: &str) -> Result<&'a CollectionState> {
    collections
        .get(name)
        .ok_or_else(|| DocVaultError::CollectionNotFound(name.to_string()))
}

/// Validate `change` against the latest committed state.
///
/// Returns the compiled schema for `SetSchema`.
pub(crate) fn check(collections: &Collections, change: &CatalogChange) -> Result<Option<Schema>> {
    match change {
        CatalogChange::CreateCollection { name } => {
            validate_collection_name(name)?;
            if collections.contains_key(name) {
                return Err(DocVaultError::CollectionExists(name.clone()));
            }
        }
        CatalogChange::DropCollection { name } => {
            existing(collections, name)?;
        }
        CatalogChange::RenameCollection { from, to } => {
            existing(collections, from)?;
            validate_collection_name(to)?;
            if collections.contains_key(to) {
                return Err(DocVaultError::CollectionExists(to.clone()));
            }
        }
        CatalogChange::CreateIndex {
            collection,
            definition,
        } => {
            validate_collection_name(collection)?;
            definition.validate()?;
            if let Some(state) = collections.get(collection) {
                if state.indexes.contains(&definition.name) {
                    return Err(DocVaultError::IndexExists(definition.name.clone()));
                }
                state.indexes.check_single_text(definition)?;
                check_unique_live(state, definition)?;
            }
        }
        CatalogChange::DropIndex { collection, name } => {
            let state = existing(collections, collection)?;
            if !state.indexes.contains(name) {
                return Err(DocVaultError::IndexNotFound(name.clone()));
            }
        }
        CatalogChange::SetSchema { collection, schema } => {
            validate_collection_name(collection)?;
            let compiled = Schema::from_value(schema)?;
            if let Some(state) = collections.get(collection) {
                for (id, chain) in &state.docs {
                    if let Some(doc) = chain.latest() {
                        compiled.validate(doc).map_err(|e| {
                            DocVaultError::SchemaError(format!(
                                "existing document {} does not satisfy the schema: {}",
                                id, e
                            ))
                        })?;
                    }
                }
            }
            return Ok(Some(compiled));
        }
        CatalogChange::RemoveSchema { collection } => {
            existing(collections, collection)?;
        }
    }
    Ok(None)
}

/// A new unique index must not already be violated by live documents
fn check_unique_live(state: &CollectionState, definition: &IndexDefinition) -> Result<()> {
    if !definition.unique || definition.kind == IndexKind::Text {
        return Ok(());
    }
    let scratch = FieldIndex::new(definition.clone());
    let mut seen = BTreeSet::new();
    for chain in state.docs.values() {
        let Some(key) = chain.latest().and_then(|doc| scratch.unique_key(doc)) else {
            continue;
        };
        if !seen.insert(key.clone()) {
            return Err(DocVaultError::UniqueViolation {
                index: definition.name.clone(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

/// Apply a checked change as of `version`
pub(crate) fn install(
    collections: &mut Collections,
    change: CatalogChange,
    compiled: Option<Schema>,
    version: u64,
) -> Result<()> {
    match change {
        CatalogChange::CreateCollection { name } => {
            collections.insert(name.clone(), CollectionState::new(name, version));
        }
        CatalogChange::DropCollection { name } => {
            collections.remove(&name);
        }
        CatalogChange::RenameCollection { from, to } => {
            let mut state = collections
                .remove(&from)
                .ok_or(DocVaultError::CollectionNotFound(from))?;
            state.name = to.clone();
            state.created_version = version;
            collections.insert(to, state);
        }
        CatalogChange::CreateIndex {
            collection,
            definition,
        } => {
            let state = collections
                .entry(collection.clone())
                .or_insert_with(|| CollectionState::new(collection, version));
            let name = definition.name.clone();
            state.indexes.create(definition)?;
            state.index_all_versions(&name);
        }
        CatalogChange::DropIndex { collection, name } => {
            if let Some(state) = collections.get_mut(&collection) {
                state.indexes.drop_index(&name)?;
            }
        }
        CatalogChange::SetSchema { collection, schema } => {
            let compiled = match compiled {
                Some(compiled) => compiled,
                None => Schema::from_value(&schema)?,
            };
            let state = collections
                .entry(collection.clone())
                .or_insert_with(|| CollectionState::new(collection, version));
            state.schema = Some(compiled);
        }
        CatalogChange::RemoveSchema { collection } => {
            if let Some(state) = collections.get_mut(&collection) {
                state.schema = None;
            }
        }
    }
    Ok(())
}

/// Committed state at `version` in primary store form
pub(crate) fn snapshot(collections: &Collections, version: u64) -> SnapshotData {
    SnapshotData {
        version,
        created_at: Utc::now(),
        collections: collections
            .values()
            .map(|state| CollectionSnapshot {
                name: state.name.clone(),
                indexes: state.index_definitions(),
                schema: state.schema.as_ref().map(|s| s.source().clone()),
                documents: state
                    .iter_visible(version)
                    .map(|(_, doc)| (**doc).clone())
                    .collect(),
            })
            .collect(),
    }
}

/// Rebuild the in-memory state of one snapshot collection
pub(crate) fn load(snapshot: CollectionSnapshot, version: u64) -> Result<CollectionState> {
    let name = snapshot.name;
    let corrupt = |e: DocVaultError| DocVaultError::Corruption(format!("collection '{}': {}", name, e));

    let mut state = CollectionState::new(name.clone(), version);
    for definition in snapshot.indexes {
        state.indexes.create(definition).map_err(corrupt)?;
    }
    if let Some(schema) = &snapshot.schema {
        state.schema = Some(Schema::from_value(schema).map_err(corrupt)?);
    }
    for doc in snapshot.documents {
        let id = doc
            .get(ID_FIELD)
            .ok_or_else(|| DocVaultError::InvalidArgument("document without _id".to_string()))
            .and_then(DocumentId::from_value)
            .map_err(corrupt)?;
        state.apply(&id, version, Some(Arc::new(doc)));
    }
    Ok(state)
}
