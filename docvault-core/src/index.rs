// src/index.rs
// Ordered secondary indexes (single-field and compound)
//
// An index maps keys to every document id that has carried that key in any
// retained version. Readers always re-check candidates against the version
// visible to their snapshot, so stale entries only cost a lookup; garbage
// collection rebuilds the maps from the surviving versions.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DocumentId;
use crate::error::{DocVaultError, Result};
use crate::text_index::TextIndex;
use crate::value_utils::get_nested_value;

/// Index key - supported types for indexing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat),
    String(String),
    /// Compound key for multi-field indexes (e.g., ["country", "city"])
    Compound(Vec<IndexKey>),
}

/// OrderedFloat wrapper for f64 to enable Ord
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.is_nan(), other.0.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal),
        }
    }
}

/// Type classes in key order. Numbers form one class so that integer and
/// float keys interleave by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyClass {
    Null,
    Bool,
    Number,
    String,
    Compound,
}

impl IndexKey {
    /// Key for a scalar JSON value; arrays and objects are not indexable.
    ///
    /// Integral floats collapse to `Int` so `2` and `2.0` share a key.
    pub fn from_value(value: &Value) -> Option<IndexKey> {
        match value {
            Value::Null => Some(IndexKey::Null),
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(IndexKey::Int(i))
                } else if let Some(f) = n.as_f64() {
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                        Some(IndexKey::Int(f as i64))
                    } else {
                        Some(IndexKey::Float(OrderedFloat(f)))
                    }
                } else {
                    None
                }
            }
            Value::String(s) => Some(IndexKey::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn class(&self) -> KeyClass {
        match self {
            IndexKey::Null => KeyClass::Null,
            IndexKey::Bool(_) => KeyClass::Bool,
            IndexKey::Int(_) | IndexKey::Float(_) => KeyClass::Number,
            IndexKey::String(_) => KeyClass::String,
            IndexKey::Compound(_) => KeyClass::Compound,
        }
    }

    /// True when the key (or any component) is null
    pub fn has_null(&self) -> bool {
        match self {
            IndexKey::Null => true,
            IndexKey::Compound(parts) => parts.iter().any(IndexKey::has_null),
            _ => false,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            IndexKey::Int(i) => Some(*i as f64),
            IndexKey::Float(f) => Some(f.0),
            _ => None,
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexKey::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            // Compound keys - compare element by element (lexicographic order)
            (Compound(a), Compound(b)) => a.cmp(b),
            (Int(_), Float(_)) | (Float(_), Int(_)) => {
                let (a, b) = (self.as_f64().unwrap_or(0.0), other.as_f64().unwrap_or(0.0));
                OrderedFloat(a)
                    .cmp(&OrderedFloat(b))
                    // equal as f64 but distinct keys: ints first keeps Ord total
                    .then_with(|| matches!(self, Float(_)).cmp(&matches!(other, Float(_))))
            }
            _ => self.class().cmp(&other.class()),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Null => f.write_str("null"),
            IndexKey::Bool(b) => write!(f, "{}", b),
            IndexKey::Int(i) => write!(f, "{}", i),
            IndexKey::Float(x) => write!(f, "{}", x.0),
            IndexKey::String(s) => write!(f, "{:?}", s),
            IndexKey::Compound(parts) => {
                f.write_str("[")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", part)?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Single,
    Compound,
    Text,
}

/// Index definition, persisted in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
    pub kind: IndexKind,
}

impl IndexDefinition {
    pub fn single(name: impl Into<String>, field: impl Into<String>, unique: bool) -> Self {
        IndexDefinition {
            name: name.into(),
            fields: vec![field.into()],
            unique,
            kind: IndexKind::Single,
        }
    }

    pub fn compound(name: impl Into<String>, fields: Vec<String>, unique: bool) -> Self {
        IndexDefinition {
            name: name.into(),
            fields,
            unique,
            kind: IndexKind::Compound,
        }
    }

    pub fn text(name: impl Into<String>, fields: Vec<String>) -> Self {
        IndexDefinition {
            name: name.into(),
            fields,
            unique: false,
            kind: IndexKind::Text,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DocVaultError::InvalidArgument(
                "index name must not be empty".to_string(),
            ));
        }
        if self.fields.is_empty() || self.fields.iter().any(|f| f.is_empty()) {
            return Err(DocVaultError::InvalidArgument(format!(
                "index '{}' needs at least one non-empty field",
                self.name
            )));
        }
        match self.kind {
            IndexKind::Single if self.fields.len() != 1 => {
                Err(DocVaultError::InvalidArgument(format!(
                    "single-field index '{}' must name exactly one field",
                    self.name
                )))
            }
            IndexKind::Text if self.unique => Err(DocVaultError::InvalidArgument(format!(
                "text index '{}' cannot be unique",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

/// Ordered index over one field or an ordered field tuple
#[derive(Debug, Clone)]
pub struct FieldIndex {
    definition: IndexDefinition,
    entries: BTreeMap<IndexKey, BTreeSet<DocumentId>>,
}

impl FieldIndex {
    pub fn new(definition: IndexDefinition) -> Self {
        FieldIndex {
            definition,
            entries: BTreeMap::new(),
        }
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn is_compound(&self) -> bool {
        self.definition.kind == IndexKind::Compound
    }

    /// Extract the key a document is indexed under.
    ///
    /// Single-field: the field must be present and scalar (null indexes as
    /// `Null`). Compound: the leading field must be present and scalar; later
    /// fields that are missing or not scalar contribute `Null`.
    pub fn extract_key(&self, doc: &Value) -> Option<IndexKey> {
        let mut fields = self.definition.fields.iter();
        let first = fields.next()?;
        let leading = IndexKey::from_value(get_nested_value(doc, first)?)?;

        if !self.is_compound() {
            return Some(leading);
        }

        let mut parts = Vec::with_capacity(self.definition.fields.len());
        parts.push(leading);
        for field in fields {
            parts.push(
                get_nested_value(doc, field)
                    .and_then(IndexKey::from_value)
                    .unwrap_or(IndexKey::Null),
            );
        }
        Some(IndexKey::Compound(parts))
    }

    /// Key subject to uniqueness, if this index is unique and the key has no
    /// null component
    pub fn unique_key(&self, doc: &Value) -> Option<IndexKey> {
        if !self.definition.unique {
            return None;
        }
        self.extract_key(doc).filter(|key| !key.has_null())
    }

    pub fn insert(&mut self, doc_id: &DocumentId, doc: &Value) {
        if let Some(key) = self.extract_key(doc) {
            self.entries.entry(key).or_default().insert(doc_id.clone());
        }
    }

    pub fn remove(&mut self, doc_id: &DocumentId, doc: &Value) {
        if let Some(key) = self.extract_key(doc) {
            if let Some(ids) = self.entries.get_mut(&key) {
                ids.remove(doc_id);
                if ids.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Ids recorded under exactly `key`
    pub fn lookup(&self, key: &IndexKey) -> impl Iterator<Item = &DocumentId> {
        self.entries.get(key).into_iter().flatten()
    }

    /// Ids whose leading key components equal `prefix`.
    ///
    /// For a single-field index the prefix must have exactly one component.
    pub fn lookup_prefix(&self, prefix: &[IndexKey]) -> BTreeSet<DocumentId> {
        let mut result = BTreeSet::new();
        if prefix.is_empty() {
            return result;
        }
        if !self.is_compound() {
            result.extend(self.lookup(&prefix[0]).cloned());
            return result;
        }

        let start = IndexKey::Compound(prefix.to_vec());
        for (key, ids) in self.entries.range(start..) {
            let IndexKey::Compound(parts) = key else {
                break;
            };
            if parts.len() < prefix.len() || parts[..prefix.len()] != *prefix {
                break;
            }
            result.extend(ids.iter().cloned());
        }
        result
    }

    /// Ids whose leading component falls inside the bounds.
    ///
    /// The scan is confined to the type class of the bounds, so `age > 5`
    /// never walks string keys.
    pub fn lookup_range(
        &self,
        lower: Bound<&IndexKey>,
        upper: Bound<&IndexKey>,
    ) -> BTreeSet<DocumentId> {
        let class = match (lower, upper) {
            (Bound::Included(k) | Bound::Excluded(k), _) => k.class(),
            (_, Bound::Included(k) | Bound::Excluded(k)) => k.class(),
            (Bound::Unbounded, Bound::Unbounded) => return self.all_ids(),
        };

        let in_range = |leading: &IndexKey| -> bool {
            if leading.class() != class {
                return false;
            }
            let above = match lower {
                Bound::Included(k) => leading >= k,
                Bound::Excluded(k) => leading > k,
                Bound::Unbounded => true,
            };
            let below = match upper {
                Bound::Included(k) => leading <= k,
                Bound::Excluded(k) => leading < k,
                Bound::Unbounded => true,
            };
            above && below
        };

        let mut result = BTreeSet::new();
        for (key, ids) in &self.entries {
            let leading = match key {
                IndexKey::Compound(parts) if self.is_compound() => match parts.first() {
                    Some(k) => k,
                    None => continue,
                },
                other => other,
            };
            if leading.class() > class {
                break;
            }
            if in_range(leading) {
                result.extend(ids.iter().cloned());
            }
        }
        result
    }

    pub fn all_ids(&self) -> BTreeSet<DocumentId> {
        self.entries.values().flatten().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of (key, id) pairs
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }
}

/// Any index a collection can carry
#[derive(Debug, Clone)]
pub enum Index {
    Field(FieldIndex),
    Text(TextIndex),
}

impl Index {
    pub fn new(definition: IndexDefinition) -> Self {
        match definition.kind {
            IndexKind::Text => Index::Text(TextIndex::new(definition)),
            IndexKind::Single | IndexKind::Compound => Index::Field(FieldIndex::new(definition)),
        }
    }

    pub fn definition(&self) -> &IndexDefinition {
        match self {
            Index::Field(index) => index.definition(),
            Index::Text(index) => index.definition(),
        }
    }

    pub fn insert(&mut self, doc_id: &DocumentId, doc: &Value) {
        match self {
            Index::Field(index) => index.insert(doc_id, doc),
            Index::Text(index) => index.insert(doc_id, doc),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Index::Field(index) => index.clear(),
            Index::Text(index) => index.clear(),
        }
    }

    pub fn entry_count(&self) -> usize {
        match self {
            Index::Field(index) => index.entry_count(),
            Index::Text(index) => index.entry_count(),
        }
    }
}

/// Index Manager - all indexes of one collection, keyed by name
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    indexes: BTreeMap<String, Index>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty index; the caller populates it.
    pub fn create(&mut self, definition: IndexDefinition) -> Result<&mut Index> {
        definition.validate()?;
        if self.indexes.contains_key(&definition.name) {
            return Err(DocVaultError::IndexExists(definition.name));
        }
        self.check_single_text(&definition)?;
        let name = definition.name.clone();
        Ok(self.indexes.entry(name).or_insert(Index::new(definition)))
    }

    pub fn drop_index(&mut self, name: &str) -> Result<Index> {
        self.indexes
            .remove(name)
            .ok_or_else(|| DocVaultError::IndexNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Index> {
        self.indexes.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }

    pub fn field_indexes(&self) -> impl Iterator<Item = &FieldIndex> {
        self.indexes.values().filter_map(|index| match index {
            Index::Field(field) => Some(field),
            Index::Text(_) => None,
        })
    }

    pub fn unique_indexes(&self) -> impl Iterator<Item = &FieldIndex> {
        self.field_indexes().filter(|index| index.definition().unique)
    }

    /// A collection carries at most one text index
    pub fn check_single_text(&self, definition: &IndexDefinition) -> Result<()> {
        match (definition.kind, self.text_index()) {
            (IndexKind::Text, Some(existing)) => Err(DocVaultError::InvalidArgument(format!(
                "collection already has text index '{}'",
                existing.definition().name
            ))),
            _ => Ok(()),
        }
    }

    /// The text index used by `search`
    pub fn text_index(&self) -> Option<&TextIndex> {
        self.indexes.values().find_map(|index| match index {
            Index::Text(text) => Some(text),
            Index::Field(_) => None,
        })
    }

    pub fn definitions(&self) -> Vec<IndexDefinition> {
        self.indexes
            .values()
            .map(|index| index.definition().clone())
            .collect()
    }

    pub fn insert_document(&mut self, doc_id: &DocumentId, doc: &Value) {
        for index in self.indexes.values_mut() {
            index.insert(doc_id, doc);
        }
    }

    pub fn clear(&mut self) {
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    pub fn entry_count(&self) -> usize {
        self.indexes.values().map(Index::entry_count).sum()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn s(v: &str) -> IndexKey {
        IndexKey::String(v.to_string())
    }

    #[test]
    fn test_key_ordering_across_types() {
        let mut keys = vec![
            s("b"),
            IndexKey::Int(3),
            IndexKey::Null,
            IndexKey::Float(OrderedFloat(2.5)),
            IndexKey::Bool(true),
            s("a"),
            IndexKey::Int(-1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                IndexKey::Null,
                IndexKey::Bool(true),
                IndexKey::Int(-1),
                IndexKey::Float(OrderedFloat(2.5)),
                IndexKey::Int(3),
                s("a"),
                s("b"),
            ]
        );
    }

    #[test]
    fn test_integral_float_normalizes() {
        assert_eq!(IndexKey::from_value(&json!(2.0)), Some(IndexKey::Int(2)));
        assert_eq!(
            IndexKey::from_value(&json!(2.5)),
            Some(IndexKey::Float(OrderedFloat(2.5)))
        );
        assert_eq!(IndexKey::from_value(&json!([1])), None);
        assert_eq!(IndexKey::from_value(&json!({"a": 1})), None);
    }

    #[test]
    fn test_single_index_skips_missing_and_composite_values() {
        let mut index = FieldIndex::new(IndexDefinition::single("age_idx", "age", false));
        index.insert(&DocumentId::Int(1), &json!({"age": 30}));
        index.insert(&DocumentId::Int(2), &json!({"name": "no age"}));
        index.insert(&DocumentId::Int(3), &json!({"age": [1, 2]}));
        index.insert(&DocumentId::Int(4), &json!({"age": null}));

        assert_eq!(index.entry_count(), 2);
        assert_eq!(
            index.lookup(&IndexKey::Int(30)).collect::<Vec<_>>(),
            vec![&DocumentId::Int(1)]
        );
        assert_eq!(index.lookup(&IndexKey::Null).count(), 1);
    }

    #[test]
    fn test_compound_prefix_lookup() {
        let def = IndexDefinition::compound(
            "loc",
            vec!["country".to_string(), "city".to_string()],
            false,
        );
        let mut index = FieldIndex::new(def);
        index.insert(&DocumentId::Int(1), &json!({"country": "NO", "city": "Oslo"}));
        index.insert(&DocumentId::Int(2), &json!({"country": "NO", "city": "Bergen"}));
        index.insert(&DocumentId::Int(3), &json!({"country": "SE", "city": "Lund"}));
        index.insert(&DocumentId::Int(4), &json!({"country": "NO"}));
        index.insert(&DocumentId::Int(5), &json!({"city": "Oslo"}));

        let by_country = index.lookup_prefix(&[s("NO")]);
        assert_eq!(by_country.len(), 3);

        let exact = index.lookup_prefix(&[s("NO"), s("Oslo")]);
        assert_eq!(exact.into_iter().collect::<Vec<_>>(), vec![DocumentId::Int(1)]);

        assert!(index.lookup_prefix(&[s("DK")]).is_empty());
    }

    #[test]
    fn test_range_stays_within_type_class() {
        let mut index = FieldIndex::new(IndexDefinition::single("age_idx", "age", false));
        for (id, age) in [(1, json!(10)), (2, json!(20.5)), (3, json!(30)), (4, json!("40"))] {
            index.insert(&DocumentId::Int(id), &json!({ "age": age }));
        }

        let above = index.lookup_range(Bound::Excluded(&IndexKey::Int(10)), Bound::Unbounded);
        assert_eq!(
            above.into_iter().collect::<Vec<_>>(),
            vec![DocumentId::Int(2), DocumentId::Int(3)]
        );

        let below = index.lookup_range(Bound::Unbounded, Bound::Included(&IndexKey::Int(20)));
        assert_eq!(below.into_iter().collect::<Vec<_>>(), vec![DocumentId::Int(1)]);
    }

    #[test]
    fn test_unique_key_ignores_nulls() {
        let def = IndexDefinition::compound(
            "uniq",
            vec!["a".to_string(), "b".to_string()],
            true,
        );
        let index = FieldIndex::new(def);
        assert!(index.unique_key(&json!({"a": 1})).is_none());
        assert!(index.unique_key(&json!({"a": 1, "b": 2})).is_some());
    }

    #[test]
    fn test_index_set_create_and_drop() {
        let mut set = IndexSet::new();
        set.create(IndexDefinition::single("email", "email", true))
            .unwrap();
        assert!(matches!(
            set.create(IndexDefinition::single("email", "other", false)),
            Err(DocVaultError::IndexExists(_))
        ));
        assert!(set
            .create(IndexDefinition::single("bad", "", false))
            .is_err());
        assert_eq!(set.unique_indexes().count(), 1);
        set.drop_index("email").unwrap();
        assert!(matches!(
            set.drop_index("email"),
            Err(DocVaultError::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_index_set_allows_one_text_index() {
        let mut set = IndexSet::new();
        set.create(IndexDefinition::text("bio_text", vec!["bio".to_string()]))
            .unwrap();
        assert!(matches!(
            set.create(IndexDefinition::text("title_text", vec!["title".to_string()])),
            Err(DocVaultError::InvalidArgument(_))
        ));
        set.create(IndexDefinition::single("title", "title", false))
            .unwrap();
        assert_eq!(set.text_index().unwrap().definition().name, "bio_text");
    }
}
