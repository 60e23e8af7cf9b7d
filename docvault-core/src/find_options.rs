// src/find_options.rs
// Find query options: projection, sort, limit, skip

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::ID_FIELD;
use crate::error::{DocVaultError, Result};
use crate::value_utils::{get_nested_value, set_nested_value, sort_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Field selection applied to each result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Keep only these fields (plus `_id`)
    Include(Vec<String>),
    /// Drop these fields
    Exclude(Vec<String>),
}

/// Options for find queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Projection>,
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(Projection::Include(fields));
        self
    }

    pub fn with_exclusion(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(Projection::Exclude(fields));
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Build a projection from optional include/exclude lists; both is an error
pub fn projection_from_parts(
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
) -> Result<Option<Projection>> {
    match (include, exclude) {
        (Some(_), Some(_)) => Err(DocVaultError::InvalidArgument(
            "projection and exclusion are mutually exclusive".to_string(),
        )),
        (Some(fields), None) => Ok(Some(Projection::Include(fields))),
        (None, Some(fields)) => Ok(Some(Projection::Exclude(fields))),
        (None, None) => Ok(None),
    }
}

/// Apply projection to a document
/// Supports dot notation for nested fields (e.g., "address.city")
pub fn apply_projection(doc: &Value, projection: &Projection) -> Value {
    let Value::Object(obj) = doc else {
        return doc.clone();
    };

    match projection {
        Projection::Include(fields) => {
            let mut result = Value::Object(Map::new());
            if let Some(id) = obj.get(ID_FIELD) {
                set_nested_value(&mut result, ID_FIELD, id.clone());
            }
            for field in fields {
                if let Some(value) = get_nested_value(doc, field) {
                    set_nested_value(&mut result, field, value.clone());
                }
            }
            result
        }
        Projection::Exclude(fields) => {
            let mut result = doc.clone();
            for field in fields {
                remove_nested_value(&mut result, field);
            }
            result
        }
    }
}

fn remove_nested_value(doc: &mut Value, path: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut current = doc;
    for part in parts {
        match current.get_mut(part) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(last);
    }
}

/// Compare two documents by one field
pub fn compare_by_field(a: &Value, b: &Value, field: &str, order: SortOrder) -> Ordering {
    let cmp = sort_values(get_nested_value(a, field), get_nested_value(b, field));
    match order {
        SortOrder::Ascending => cmp,
        SortOrder::Descending => cmp.reverse(),
    }
}

/// Stable sort by one field; missing values sort first when ascending
pub fn apply_sort(docs: &mut [Value], field: &str, order: SortOrder) {
    docs.sort_by(|a, b| compare_by_field(a, b, field, order));
}
