use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{DocVaultError, Result};
use crate::value_utils::values_equal;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl SchemaType {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map_or(false, |f| f.fract() == 0.0)
            }
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::Null => value.is_null(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::Null => "null",
        }
    }
}

/// One compiled level of a schema
#[derive(Clone, Debug, Default)]
struct SchemaNode {
    schema_type: Option<SchemaType>,
    required: Vec<String>,
    properties: BTreeMap<String, SchemaNode>,
    items: Option<Box<SchemaNode>>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min_items: Option<usize>,
    max_items: Option<usize>,
    enum_values: Option<Vec<Value>>,
    pattern: Option<Regex>,
}

/// Per-collection validation contract
///
/// Compiled once from a JSON-Schema-like object; the source JSON is kept so
/// the schema can be returned to callers and persisted verbatim.
///
/// ```
/// use docvault_core::Schema;
/// use serde_json::json;
///
/// let schema = Schema::from_value(&json!({
///     "type": "object",
///     "required": ["email"],
///     "properties": {"email": {"type": "string", "pattern": "@"}}
/// })).unwrap();
/// assert!(schema.validate(&json!({"email": "a@b.c"})).is_ok());
/// assert!(schema.validate(&json!({"name": "x"})).is_err());
/// ```
#[derive(Clone)]
pub struct Schema {
    source: Value,
    root: SchemaNode,
}

impl Schema {
    pub fn from_value(schema: &Value) -> Result<Self> {
        let root = compile_node(schema, "")?;
        Ok(Schema {
            source: schema.clone(),
            root,
        })
    }

    /// The JSON this schema was compiled from
    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        validate_node(&self.root, value, "")
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema").field("source", &self.source).finish()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.source.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = Value::deserialize(deserializer)?;
        Schema::from_value(&source).map_err(D::Error::custom)
    }
}

fn schema_error(path: &str, message: impl fmt::Display) -> DocVaultError {
    if path.is_empty() {
        DocVaultError::SchemaError(message.to_string())
    } else {
        DocVaultError::SchemaError(format!("'{}': {}", path, message))
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn read_usize(obj: &serde_json::Map<String, Value>, key: &str, path: &str) -> Result<Option<usize>> {
    match obj.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| schema_error(path, format!("{} must be a non-negative integer", key))),
    }
}

fn read_f64(obj: &serde_json::Map<String, Value>, key: &str, path: &str) -> Result<Option<f64>> {
    match obj.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| schema_error(path, format!("{} must be a number", key))),
    }
}

fn compile_node(schema: &Value, path: &str) -> Result<SchemaNode> {
    let obj = schema
        .as_object()
        .ok_or_else(|| schema_error(path, "schema must be a JSON object"))?;

    let mut node = SchemaNode::default();

    if let Some(type_value) = obj.get("type") {
        let type_str = type_value
            .as_str()
            .ok_or_else(|| schema_error(path, "type must be a string"))?;
        node.schema_type = Some(
            SchemaType::from_str(type_str)
                .ok_or_else(|| schema_error(path, format!("unsupported type '{}'", type_str)))?,
        );
    }

    if let Some(required) = obj.get("required") {
        let arr = required
            .as_array()
            .ok_or_else(|| schema_error(path, "required must be an array of field names"))?;
        for entry in arr {
            let field = entry
                .as_str()
                .ok_or_else(|| schema_error(path, "required entries must be strings"))?;
            node.required.push(field.to_string());
        }
    }

    if let Some(props) = obj.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| schema_error(path, "properties must be an object"))?;
        for (field, spec) in props {
            let compiled = compile_node(spec, &child_path(path, field))?;
            node.properties.insert(field.clone(), compiled);
        }
    }

    if let Some(items) = obj.get("items") {
        node.items = Some(Box::new(compile_node(items, &format!("{}[]", path))?));
    }

    if let Some(enum_value) = obj.get("enum") {
        let values = enum_value
            .as_array()
            .ok_or_else(|| schema_error(path, "enum must be an array"))?;
        node.enum_values = Some(values.clone());
    }

    if let Some(pattern) = obj.get("pattern") {
        let pattern = pattern
            .as_str()
            .ok_or_else(|| schema_error(path, "pattern must be a string"))?;
        let regex = Regex::new(pattern)
            .map_err(|e| schema_error(path, format!("invalid pattern: {}", e)))?;
        node.pattern = Some(regex);
    }

    node.minimum = read_f64(obj, "minimum", path)?;
    node.maximum = read_f64(obj, "maximum", path)?;
    node.min_length = read_usize(obj, "minLength", path)?;
    node.max_length = read_usize(obj, "maxLength", path)?;
    node.min_items = read_usize(obj, "minItems", path)?;
    node.max_items = read_usize(obj, "maxItems", path)?;

    Ok(node)
}

fn validate_node(node: &SchemaNode, value: &Value, path: &str) -> Result<()> {
    if let Some(schema_type) = node.schema_type {
        if !schema_type.matches(value) {
            return Err(schema_error(
                path,
                format!("expected type {}", schema_type.as_str()),
            ));
        }
    }

    if let Some(allowed) = &node.enum_values {
        if !allowed.iter().any(|candidate| values_equal(candidate, value)) {
            return Err(schema_error(
                path,
                format!("value {} is not one of the allowed values", value),
            ));
        }
    }

    match value {
        Value::Object(obj) => {
            for field in &node.required {
                if !obj.contains_key(field) {
                    return Err(schema_error(
                        path,
                        format!("missing required field '{}'", field),
                    ));
                }
            }
            for (key, child) in &node.properties {
                if let Some(field_value) = obj.get(key) {
                    validate_node(child, field_value, &child_path(path, key))?;
                }
            }
        }
        Value::Array(arr) => {
            let min = node.min_items.or(node.min_length);
            let max = node.max_items.or(node.max_length);
            if let Some(min) = min {
                if arr.len() < min {
                    return Err(schema_error(
                        path,
                        format!("has {} items, minimum is {}", arr.len(), min),
                    ));
                }
            }
            if let Some(max) = max {
                if arr.len() > max {
                    return Err(schema_error(
                        path,
                        format!("has {} items, maximum is {}", arr.len(), max),
                    ));
                }
            }
            if let Some(items) = &node.items {
                for (idx, item) in arr.iter().enumerate() {
                    validate_node(items, item, &format!("{}[{}]", path, idx))?;
                }
            }
        }
        Value::String(s) => {
            let len = s.chars().count();
            if let Some(min) = node.min_length {
                if len < min {
                    return Err(schema_error(
                        path,
                        format!("length {} is less than minimum {}", len, min),
                    ));
                }
            }
            if let Some(max) = node.max_length {
                if len > max {
                    return Err(schema_error(
                        path,
                        format!("length {} exceeds maximum {}", len, max),
                    ));
                }
            }
            if let Some(pattern) = &node.pattern {
                if !pattern.is_match(s) {
                    return Err(schema_error(path, "does not match required pattern"));
                }
            }
        }
        Value::Number(n) => {
            if let Some(number) = n.as_f64() {
                if let Some(min) = node.minimum {
                    if number < min {
                        return Err(schema_error(
                            path,
                            format!("{} is less than minimum {}", number, min),
                        ));
                    }
                }
                if let Some(max) = node.maximum {
                    if number > max {
                        return Err(schema_error(
                            path,
                            format!("{} exceeds maximum {}", number, max),
                        ));
                    }
                }
            }
        }
        Value::Bool(_) | Value::Null => {}
    }

    Ok(())
}
