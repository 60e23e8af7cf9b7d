// src/document.rs
// Document identity and shape helpers

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{DocVaultError, Result};
use crate::value_utils::set_nested_value;

/// Name of the identity field every stored document carries
pub const ID_FIELD: &str = "_id";

/// Document identifier
///
/// Untagged so it appears as a plain value inside documents: `{"_id": 2}`
/// or `{"_id": "5f0c..."}`. Integers order before strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    String(String),
}

impl DocumentId {
    /// Fresh random identifier (UUID v4, simple form)
    pub fn generate() -> Self {
        DocumentId::String(Uuid::new_v4().simple().to_string())
    }

    /// Interpret a JSON `_id` value
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Ok(DocumentId::String(s.clone())),
            Value::Number(n) => n.as_i64().map(DocumentId::Int).ok_or_else(|| {
                DocVaultError::InvalidArgument(format!(
                    "_id must be an integer or a non-empty string, got {}",
                    n
                ))
            }),
            other => Err(DocVaultError::InvalidArgument(format!(
                "_id must be an integer or a non-empty string, got {}",
                other
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::from(*i),
            DocumentId::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(i) => write!(f, "{}", i),
            DocumentId::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(value: i64) -> Self {
        DocumentId::Int(value)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        DocumentId::String(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        DocumentId::String(value)
    }
}

/// Validate a document for insertion and make sure it carries an `_id`.
///
/// Returns the id together with the (possibly amended) document.
pub fn prepare_for_insert(doc: Value) -> Result<(DocumentId, Value)> {
    let Value::Object(mut map) = doc else {
        return Err(DocVaultError::InvalidArgument(
            "document must be a JSON object".to_string(),
        ));
    };

    let id = match map.get(ID_FIELD) {
        Some(value) => DocumentId::from_value(value)?,
        None => {
            let id = DocumentId::generate();
            map.insert(ID_FIELD.to_string(), id.to_value());
            id
        }
    };

    Ok((id, Value::Object(map)))
}

/// Force the `_id` field of `doc` to `id` (used by upserts and replaces)
pub fn with_id(doc: Value, id: &DocumentId) -> Result<Value> {
    let Value::Object(mut map) = doc else {
        return Err(DocVaultError::InvalidArgument(
            "document must be a JSON object".to_string(),
        ));
    };
    map.insert(ID_FIELD.to_string(), id.to_value());
    Ok(Value::Object(map))
}

/// Merge `updates` into `existing`
///
/// Top-level keys overwrite; dotted keys (`"address.city"`) set nested
/// paths. `_id` is never changed by an update.
pub fn merge_update(existing: &Value, updates: &Value) -> Result<Value> {
    let Value::Object(update_map) = updates else {
        return Err(DocVaultError::InvalidArgument(
            "update must be a JSON object".to_string(),
        ));
    };

    let mut merged = match existing {
        Value::Object(map) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    };

    for (key, value) in update_map {
        if key == ID_FIELD {
            continue;
        }
        if key.contains('.') {
            set_nested_value(&mut merged, key, value.clone());
        } else if let Value::Object(map) = &mut merged {
            map.insert(key.clone(), value.clone());
        }
    }

    Ok(merged)
}

/// Serialized size of a document in bytes
pub fn document_size(doc: &Value) -> Result<usize> {
    Ok(serde_json::to_vec(doc)?.len())
}
