// collection/bulk.rs
// Bulk write: a batch of mixed operations inside one transaction
//
// Each operation is atomic on its own. Ordered batches stop at the first
// failing operation; unordered batches attempt every operation and collect
// all failures. Size limits are checked before anything is staged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DocumentId;
use crate::error::{DocVaultError, ErrorKind, Result};
use crate::transaction::Transaction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    Insert(Value),
    UpdateOne { filter: String, update: Value },
    UpdateMany { filter: String, update: Value },
    DeleteOne { filter: String },
    DeleteMany { filter: String },
}

/// An operation batch
///
/// ```
/// use docvault_core::BulkWrite;
/// use serde_json::json;
///
/// let bulk = BulkWrite::new()
///     .insert(json!({"name": "Alice"}))
///     .update_many("age < 18", json!({"minor": true}))
///     .delete_one("name is Bob")
///     .unordered();
/// assert_eq!(bulk.len(), 3);
/// assert!(!bulk.is_ordered());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWrite {
    operations: Vec<BulkOperation>,
    ordered: bool,
}

impl Default for BulkWrite {
    fn default() -> Self {
        BulkWrite {
            operations: Vec::new(),
            ordered: true,
        }
    }
}

impl BulkWrite {
    /// Empty ordered batch
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operations(operations: Vec<BulkOperation>, ordered: bool) -> Self {
        BulkWrite {
            operations,
            ordered,
        }
    }

    /// Parse a JSON array such as
    /// `[{"insert": {...}}, {"delete_many": {"filter": "age < 18"}}]`
    pub fn from_json(operations: &Value, ordered: bool) -> Result<Self> {
        let operations: Vec<BulkOperation> = serde_json::from_value(operations.clone())
            .map_err(|e| DocVaultError::InvalidArgument(format!("invalid bulk operations: {}", e)))?;
        Ok(Self::from_operations(operations, ordered))
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn unordered(self) -> Self {
        self.ordered(false)
    }

    pub fn operation(mut self, operation: BulkOperation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn insert(self, doc: Value) -> Self {
        self.operation(BulkOperation::Insert(doc))
    }

    pub fn update_one(self, filter: &str, update: Value) -> Self {
        self.operation(BulkOperation::UpdateOne {
            filter: filter.to_string(),
            update,
        })
    }

    pub fn update_many(self, filter: &str, update: Value) -> Self {
        self.operation(BulkOperation::UpdateMany {
            filter: filter.to_string(),
            update,
        })
    }

    pub fn delete_one(self, filter: &str) -> Self {
        self.operation(BulkOperation::DeleteOne {
            filter: filter.to_string(),
        })
    }

    pub fn delete_many(self, filter: &str) -> Self {
        self.operation(BulkOperation::DeleteMany {
            filter: filter.to_string(),
        })
    }

    pub fn operations(&self) -> &[BulkOperation] {
        &self.operations
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Failure of one operation in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkWriteError {
    pub operation_index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkWriteResult {
    pub inserted_count: usize,
    pub updated_count: usize,
    pub deleted_count: usize,
    pub inserted_ids: Vec<DocumentId>,
    /// In operation order
    pub errors: Vec<BulkWriteError>,
}

impl BulkWriteResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

enum Effect {
    Inserted(DocumentId),
    Updated(usize),
    Deleted(usize),
}

/// Errors that end the whole batch instead of one operation
fn is_fatal(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Conflict
            | ErrorKind::Durability
            | ErrorKind::InactiveTransaction
            | ErrorKind::Closed
            | ErrorKind::ReadOnly
    )
}

impl Transaction {
    /// Stage a batch of operations on `collection`.
    ///
    /// Per-operation failures are recorded in the result and leave the
    /// transaction usable; the caller decides whether to commit.
    pub fn bulk_write(&mut self, collection: &str, bulk: &BulkWrite) -> Result<BulkWriteResult> {
        let options = self.database().options();
        let (max_operations, max_body) = (options.max_bulk_operations, options.max_request_body_size);

        if bulk.len() > max_operations {
            return Err(DocVaultError::TooManyOperations {
                count: bulk.len(),
                limit: max_operations,
            });
        }
        let size = serde_json::to_vec(bulk.operations())?.len();
        if size > max_body {
            return Err(DocVaultError::RequestTooLarge {
                size,
                limit: max_body,
            });
        }

        let mut result = BulkWriteResult::default();
        for (index, operation) in bulk.operations().iter().enumerate() {
            match self.atomic(|tx| tx.apply_operation(collection, operation)) {
                Ok(Effect::Inserted(id)) => {
                    result.inserted_count += 1;
                    result.inserted_ids.push(id);
                }
                Ok(Effect::Updated(n)) => result.updated_count += n,
                Ok(Effect::Deleted(n)) => result.deleted_count += n,
                Err(e) if is_fatal(e.kind()) => return Err(e),
                Err(e) => {
                    result.errors.push(BulkWriteError {
                        operation_index: index,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    if bulk.is_ordered() {
                        break;
                    }
                }
            }
        }
        Ok(result)
    }

    fn apply_operation(&mut self, collection: &str, operation: &BulkOperation) -> Result<Effect> {
        Ok(match operation {
            BulkOperation::Insert(doc) => Effect::Inserted(self.insert(collection, doc.clone())?),
            BulkOperation::UpdateOne { filter, update } => {
                Effect::Updated(self.update_one(collection, filter, update)? as usize)
            }
            BulkOperation::UpdateMany { filter, update } => {
                Effect::Updated(self.update(collection, filter, update)?)
            }
            BulkOperation::DeleteOne { filter } => {
                Effect::Deleted(self.delete_one(collection, filter)? as usize)
            }
            BulkOperation::DeleteMany { filter } => Effect::Deleted(self.delete(collection, filter)?),
        })
    }
}
