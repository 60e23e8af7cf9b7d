// query/planner.rs
// Index selection for top-level conjunctions
//
// Only `field is value` and range comparisons that appear as top-level
// conjuncts with non-null scalar values are considered. A plan only ever
// narrows the set of documents to examine; the full filter is still
// evaluated on every candidate.

use std::collections::BTreeSet;
use std::ops::Bound;

use serde::Serialize;
use serde_json::Value;

use crate::document::DocumentId;
use crate::index::{FieldIndex, IndexKey, IndexKind, IndexSet};

use super::{CompareOp, Filter};

/// How a query finds its candidates
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryPlan {
    FullScan,
    /// Equality on the leading fields of an index
    IndexEquality {
        index: String,
        fields: Vec<String>,
        values: Vec<Value>,
    },
    /// Range on the leading field of an index
    IndexRange {
        index: String,
        field: String,
        lower: Option<RangeBound>,
        upper: Option<RangeBound>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeBound {
    pub value: Value,
    pub inclusive: bool,
}

impl RangeBound {
    fn to_bound(&self) -> Option<Bound<IndexKey>> {
        let key = IndexKey::from_value(&self.value)?;
        Some(if self.inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        })
    }
}

impl QueryPlan {
    pub fn index_name(&self) -> Option<&str> {
        match self {
            QueryPlan::FullScan => None,
            QueryPlan::IndexEquality { index, .. } | QueryPlan::IndexRange { index, .. } => {
                Some(index)
            }
        }
    }

    pub fn uses_index(&self) -> bool {
        !matches!(self, QueryPlan::FullScan)
    }

    /// Candidate ids from the index, or `None` for a full scan
    pub fn candidates(&self, indexes: &IndexSet) -> Option<BTreeSet<DocumentId>> {
        match self {
            QueryPlan::FullScan => None,
            QueryPlan::IndexEquality { index, values, .. } => {
                let index = field_index(indexes, index)?;
                let prefix: Option<Vec<IndexKey>> =
                    values.iter().map(IndexKey::from_value).collect();
                Some(index.lookup_prefix(&prefix?))
            }
            QueryPlan::IndexRange {
                index,
                lower,
                upper,
                ..
            } => {
                let index = field_index(indexes, index)?;
                let lower = match lower {
                    Some(bound) => bound.to_bound()?,
                    None => Bound::Unbounded,
                };
                let upper = match upper {
                    Some(bound) => bound.to_bound()?,
                    None => Bound::Unbounded,
                };
                Some(index.lookup_range(as_ref(&lower), as_ref(&upper)))
            }
        }
    }
}

fn as_ref(bound: &Bound<IndexKey>) -> Bound<&IndexKey> {
    match bound {
        Bound::Included(k) => Bound::Included(k),
        Bound::Excluded(k) => Bound::Excluded(k),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn field_index<'a>(indexes: &'a IndexSet, name: &str) -> Option<&'a FieldIndex> {
    indexes.field_indexes().find(|i| i.definition().name == name)
}

/// Chooses a [`QueryPlan`] for a filter over one collection's indexes
pub struct QueryPlanner;

impl QueryPlanner {
    pub fn plan(filter: Option<&Filter>, indexes: &IndexSet) -> QueryPlan {
        let Some(filter) = filter else {
            return QueryPlan::FullScan;
        };
        let conjuncts = filter.conjuncts();

        if let Some(plan) = Self::best_equality(&conjuncts, indexes) {
            return plan;
        }
        Self::first_range(&conjuncts, indexes).unwrap_or(QueryPlan::FullScan)
    }

    fn best_equality(conjuncts: &[&Filter], indexes: &IndexSet) -> Option<QueryPlan> {
        let mut best: Option<(usize, QueryPlan)> = None;

        for index in indexes.field_indexes() {
            let definition = index.definition();
            let mut values = Vec::new();
            for field in &definition.fields {
                match equality_value(conjuncts, field) {
                    Some(value) => values.push(value.clone()),
                    None => break,
                }
            }
            if values.is_empty() {
                continue;
            }
            // a single-field index only answers a one-component prefix
            if definition.kind == IndexKind::Single {
                values.truncate(1);
            }
            let len = values.len();
            if best.as_ref().map_or(true, |(best_len, _)| len > *best_len) {
                best = Some((
                    len,
                    QueryPlan::IndexEquality {
                        index: definition.name.clone(),
                        fields: definition.fields[..len].to_vec(),
                        values,
                    },
                ));
            }
        }

        best.map(|(_, plan)| plan)
    }

    fn first_range(conjuncts: &[&Filter], indexes: &IndexSet) -> Option<QueryPlan> {
        for index in indexes.field_indexes() {
            let definition = index.definition();
            let Some(field) = definition.fields.first() else {
                continue;
            };

            let mut lower = None;
            let mut upper = None;
            for conjunct in conjuncts {
                let Filter::Compare {
                    field: f,
                    op,
                    value,
                } = conjunct
                else {
                    continue;
                };
                if f != field || !rangeable(value) {
                    continue;
                }
                let bound = |inclusive| RangeBound {
                    value: value.clone(),
                    inclusive,
                };
                match op {
                    CompareOp::Gt if lower.is_none() => lower = Some(bound(false)),
                    CompareOp::Gte if lower.is_none() => lower = Some(bound(true)),
                    CompareOp::Lt if upper.is_none() => upper = Some(bound(false)),
                    CompareOp::Lte if upper.is_none() => upper = Some(bound(true)),
                    _ => {}
                }
            }

            // bounds of different types can never both hold; keep the lower
            let mixed = match (&lower, &upper) {
                (Some(l), Some(u)) => {
                    std::mem::discriminant(&l.value) != std::mem::discriminant(&u.value)
                }
                _ => false,
            };
            if mixed {
                upper = None;
            }

            if lower.is_some() || upper.is_some() {
                return Some(QueryPlan::IndexRange {
                    index: definition.name.clone(),
                    field: field.clone(),
                    lower,
                    upper,
                });
            }
        }
        None
    }
}

fn equality_value<'a>(conjuncts: &[&'a Filter], field: &str) -> Option<&'a Value> {
    conjuncts.iter().copied().find_map(|conjunct| match conjunct {
        Filter::Compare {
            field: f,
            op: CompareOp::Eq,
            value,
        } if f == field && indexable(value) => Some(value),
        _ => None,
    })
}

/// Non-null scalar that converts to an index key
fn indexable(value: &Value) -> bool {
    !value.is_null() && IndexKey::from_value(value).is_some()
}

/// Ordering comparisons only hold between numbers or between strings
fn rangeable(value: &Value) -> bool {
    matches!(value, Value::Number(_) | Value::String(_)) && indexable(value)
}
