// docvault-core/src/error.rs
// Error type shared by every layer of the store

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used by callers (and the retry loop) to decide
/// how to react to a failure without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Validation,
    LimitExceeded,
    Constraint,
    Durability,
    InactiveTransaction,
    Closed,
    ReadOnly,
}

#[derive(Error, Debug)]
pub enum DocVaultError {
    // ========== NotFound ==========
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Document not found: {collection}/{id}")]
    DocumentNotFound { collection: String, id: String },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    // ========== AlreadyExists ==========
    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Index already exists: {0}")]
    IndexExists(String),

    // ========== Conflict ==========
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    // ========== Validation ==========
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Schema validation failed: {0}")]
    SchemaError(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ========== LimitExceeded ==========
    #[error("Document size {size} bytes exceeds limit of {limit} bytes")]
    DocumentTooLarge { size: usize, limit: usize },

    #[error("Bulk write of {count} operations exceeds limit of {limit}")]
    TooManyOperations { count: usize, limit: usize },

    #[error("Request body of {size} bytes exceeds limit of {limit} bytes")]
    RequestTooLarge { size: usize, limit: usize },

    // ========== Constraint ==========
    #[error("Unique index '{index}' violated by key {key}")]
    UniqueViolation { index: String, key: String },

    // ========== Durability ==========
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WAL corruption: {0}")]
    WALCorruption(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    // ========== Lifecycle ==========
    #[error("Transaction is no longer active")]
    InactiveTransaction,

    #[error("Database is closed")]
    DatabaseClosed,

    #[error("Database is opened read-only")]
    ReadOnly,

    #[error("Watch subscription already stopped")]
    WatchStopped,
}

impl DocVaultError {
    pub fn kind(&self) -> ErrorKind {
        use DocVaultError::*;
        match self {
            CollectionNotFound(_) | DocumentNotFound { .. } | IndexNotFound(_) => {
                ErrorKind::NotFound
            }
            CollectionExists(_) | IndexExists(_) => ErrorKind::AlreadyExists,
            Conflict(_) => ErrorKind::Conflict,
            InvalidQuery(_) | SchemaError(_) | AggregationError(_) | InvalidArgument(_) => {
                ErrorKind::Validation
            }
            DocumentTooLarge { .. } | TooManyOperations { .. } | RequestTooLarge { .. } => {
                ErrorKind::LimitExceeded
            }
            UniqueViolation { .. } => ErrorKind::Constraint,
            Io(_) | Serialization(_) | WALCorruption(_) | Corruption(_) => ErrorKind::Durability,
            InactiveTransaction | WatchStopped => ErrorKind::InactiveTransaction,
            DatabaseClosed => ErrorKind::Closed,
            ReadOnly => ErrorKind::ReadOnly,
        }
    }

    /// Only conflicts are worth retrying; everything else is deterministic.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DocVaultError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, DocVaultError>;
