// docvault-core/src/lib.rs
// Embedded transactional JSON document store

//! `docvault-core` stores JSON documents in named collections inside a
//! single database file.
//!
//! Reads run against MVCC snapshots, writes are buffered in a
//! [`Transaction`] and committed atomically through a write-ahead log.
//! Committed state is periodically checkpointed into the primary file.
//!
//! ```no_run
//! use docvault_core::{Database, SortOrder};
//! use serde_json::json;
//!
//! # fn main() -> docvault_core::Result<()> {
//! let db = Database::open("app.db")?;
//! let users = db.create_collection("users")?;
//! users.create_index("email", true)?;
//! users.insert(json!({"name": "Alice", "email": "alice@example.com", "age": 30}))?;
//!
//! let adults = users
//!     .query()
//!     .filter("age >= 18")
//!     .sort_by("name", SortOrder::Ascending)
//!     .all()?;
//! assert_eq!(adults.len(), 1);
//!
//! let mut tx = db.begin()?;
//! tx.update("users", "name is \"Alice\"", &json!({"age": 31}))?;
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod aggregation;
mod catalog;
pub mod collection;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod find_options;
pub mod index;
pub mod logging;
pub mod metrics;
pub mod mvcc;
pub mod query;
pub mod query_cache;
pub mod stats;
pub mod storage;
pub mod text_index;
pub mod transaction;
pub mod value_utils;
pub mod wal;
pub mod watch;

// Public exports
pub use aggregation::Pipeline;
pub use collection::bulk::{BulkOperation, BulkWrite, BulkWriteError, BulkWriteResult};
pub use collection::schema::Schema;
pub use collection::{Collection, CollectionQuery};
pub use config::{DatabaseOptions, DurabilityMode, TransactionConfig};
pub use database::Database;
pub use document::DocumentId;
pub use error::{DocVaultError, ErrorKind, Result};
pub use find_options::{FindOptions, Projection, SortOrder};
pub use index::{IndexDefinition, IndexKind};
pub use logging::{init_logging, LogLevel};
pub use metrics::MetricsSnapshot;
pub use query::{Filter, QueryBuilder, QueryPlan};
pub use stats::{CheckpointStats, CollectionInfo, DatabaseInfo, GarbageCollectionStats, IndexInfo};
pub use storage::backup::{verify_backup, BackupInfo};
pub use text_index::{MatchMode, SearchResult};
pub use transaction::{Transaction, TransactionState, TxQuery, UpsertResult};
pub use watch::{ChangeEvent, ChangeOperation, WatchBuilder, WatchHandle};
