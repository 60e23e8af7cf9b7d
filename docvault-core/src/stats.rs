// src/stats.rs
// Serializable reports returned by administrative calls

use std::path::PathBuf;

use serde::Serialize;

use crate::index::{IndexDefinition, IndexKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
    pub kind: IndexKind,
}

impl From<&IndexDefinition> for IndexInfo {
    fn from(definition: &IndexDefinition) -> Self {
        IndexInfo {
            name: definition.name.clone(),
            fields: definition.fields.clone(),
            unique: definition.unique,
            kind: definition.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub document_count: usize,
    pub indexes: Vec<IndexInfo>,
    pub has_schema: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseInfo {
    pub path: PathBuf,
    pub format_version: u32,
    pub committed_version: u64,
    /// Size of the primary store file in bytes
    pub file_size: u64,
    pub wal_size: u64,
    pub wal_frame_count: u64,
    pub collections: Vec<CollectionInfo>,
    pub total_documents: usize,
    pub read_only: bool,
}

/// Result of a garbage collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GarbageCollectionStats {
    /// Oldest snapshot still protected
    pub horizon: u64,
    pub versions_removed: usize,
    /// Deleted documents whose history was dropped entirely
    pub documents_removed: usize,
    pub index_entries_before: usize,
    pub index_entries_after: usize,
    pub active_transactions: usize,
}

/// Result of a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointStats {
    pub version: u64,
    pub frames_merged: u64,
    pub file_size: u64,
}
