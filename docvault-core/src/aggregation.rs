// src/aggregation.rs
// Aggregation pipeline implementation
//
// Stages run in the order they were defined. A `group_by` stage replaces
// the document stream with one document per distinct group value, so later
// stages see grouped output.

use std::cmp::Ordering;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{DocVaultError, Result};
use crate::find_options::{apply_projection, apply_sort, Projection, SortOrder};
use crate::index::IndexKey;
use crate::query::Filter;
use crate::value_utils::{get_nested_value, set_nested_value, sort_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumulatorKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AccumulatorKind {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "count" => Ok(AccumulatorKind::Count),
            "sum" => Ok(AccumulatorKind::Sum),
            "avg" => Ok(AccumulatorKind::Avg),
            "min" => Ok(AccumulatorKind::Min),
            "max" => Ok(AccumulatorKind::Max),
            other => Err(agg_error(format!("unknown accumulator type '{}'", other))),
        }
    }
}

/// One output field of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    pub kind: AccumulatorKind,
    /// Input field; optional for `count`, which then counts documents
    pub field: Option<String>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub field: String,
    pub accumulators: Vec<Accumulator>,
}

/// Pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Filter expression, parsed when the pipeline runs
    Match(String),
    GroupBy(GroupSpec),
    Sort { field: String, order: SortOrder },
    Limit(usize),
    Skip(usize),
    Project(Vec<String>),
    Exclude(Vec<String>),
}

/// Aggregation pipeline
///
/// ```
/// use docvault_core::aggregation::Pipeline;
/// use serde_json::json;
///
/// let pipeline = Pipeline::new()
///     .match_filter("amt > 0")
///     .group_by("city")
///     .sum("amt", "total")
///     .sort("total", false);
///
/// let out = pipeline
///     .execute(vec![
///         json!({"city": "A", "amt": 10}),
///         json!({"city": "A", "amt": 5}),
///         json!({"city": "B", "amt": 7}),
///     ])
///     .unwrap();
/// assert_eq!(out, vec![json!({"city": "A", "total": 15}), json!({"city": "B", "total": 7})]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
    /// Builder misuse reported by `execute`
    invalid: Option<String>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn match_filter(self, filter: &str) -> Self {
        self.stage(Stage::Match(filter.to_string()))
    }

    pub fn group_by(self, field: &str) -> Self {
        self.stage(Stage::GroupBy(GroupSpec {
            field: field.to_string(),
            accumulators: Vec::new(),
        }))
    }

    /// Number of documents per group
    pub fn count(self, output: &str) -> Self {
        self.accumulate(AccumulatorKind::Count, None, output)
    }

    pub fn sum(self, field: &str, output: &str) -> Self {
        self.accumulate(AccumulatorKind::Sum, Some(field), output)
    }

    pub fn avg(self, field: &str, output: &str) -> Self {
        self.accumulate(AccumulatorKind::Avg, Some(field), output)
    }

    pub fn min(self, field: &str, output: &str) -> Self {
        self.accumulate(AccumulatorKind::Min, Some(field), output)
    }

    pub fn max(self, field: &str, output: &str) -> Self {
        self.accumulate(AccumulatorKind::Max, Some(field), output)
    }

    fn accumulate(mut self, kind: AccumulatorKind, field: Option<&str>, output: &str) -> Self {
        let accumulator = Accumulator {
            kind,
            field: field.map(str::to_string),
            output: output.to_string(),
        };
        match self.stages.last_mut() {
            Some(Stage::GroupBy(group)) => group.accumulators.push(accumulator),
            _ => {
                self.invalid.get_or_insert_with(|| {
                    format!("accumulator '{}' must follow group_by", output)
                });
            }
        }
        self
    }

    pub fn sort(self, field: &str, ascending: bool) -> Self {
        let order = if ascending {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        };
        self.stage(Stage::Sort {
            field: field.to_string(),
            order,
        })
    }

    pub fn limit(self, n: usize) -> Self {
        self.stage(Stage::Limit(n))
    }

    pub fn skip(self, n: usize) -> Self {
        self.stage(Stage::Skip(n))
    }

    pub fn project(self, fields: &[&str]) -> Self {
        self.stage(Stage::Project(
            fields.iter().map(|f| f.to_string()).collect(),
        ))
    }

    pub fn exclude(self, fields: &[&str]) -> Self {
        self.stage(Stage::Exclude(
            fields.iter().map(|f| f.to_string()).collect(),
        ))
    }

    /// Create pipeline from a JSON stage array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let Value::Array(stages_array) = pipeline_json else {
            return Err(agg_error("pipeline must be an array"));
        };

        let mut pipeline = Pipeline::new();
        for stage_json in stages_array {
            pipeline.stages.push(Stage::from_json(stage_json)?);
        }
        Ok(pipeline)
    }

    /// Leading `match` stage, which callers may push down into an index scan
    pub fn leading_match(&self) -> Option<&str> {
        match self.stages.first() {
            Some(Stage::Match(filter)) => Some(filter),
            _ => None,
        }
    }

    /// Execute pipeline on documents
    pub fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        if let Some(message) = &self.invalid {
            return Err(agg_error(message.clone()));
        }
        let mut docs = docs;
        for stage in &self.stages {
            docs = stage.execute(docs)?;
        }
        Ok(docs)
    }
}

impl Stage {
    /// Parse stage from JSON
    fn from_json(stage_json: &Value) -> Result<Self> {
        let Value::Object(obj) = stage_json else {
            return Err(agg_error("each stage must be an object"));
        };
        let mut entries = obj.iter();
        let (name, spec) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => return Err(agg_error("each stage must have exactly one key")),
        };

        match name.as_str() {
            "match" => {
                let filter = spec
                    .as_str()
                    .ok_or_else(|| agg_error("match expects a filter string"))?;
                // reject bad filters up front
                Filter::parse(filter)?;
                Ok(Stage::Match(filter.to_string()))
            }
            "group_by" => Ok(Stage::GroupBy(parse_group(spec)?)),
            "sort" => {
                let field = required_str(spec, "field", "sort")?;
                let ascending = match spec.get("ascending") {
                    None => true,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => return Err(agg_error("sort.ascending must be a boolean")),
                };
                let order = if ascending {
                    SortOrder::Ascending
                } else {
                    SortOrder::Descending
                };
                Ok(Stage::Sort { field, order })
            }
            "limit" => Ok(Stage::Limit(parse_count(spec, "limit")?)),
            "skip" => Ok(Stage::Skip(parse_count(spec, "skip")?)),
            "project" => Ok(Stage::Project(parse_fields(spec, "project")?)),
            "exclude" => Ok(Stage::Exclude(parse_fields(spec, "exclude")?)),
            other => Err(agg_error(format!("unknown stage '{}'", other))),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(src) => {
                let filter = Filter::parse(src)?;
                Ok(docs.into_iter().filter(|doc| filter.matches(doc)).collect())
            }
            Stage::GroupBy(group) => Ok(execute_group(group, &docs)),
            Stage::Sort { field, order } => {
                let mut docs = docs;
                apply_sort(&mut docs, field, *order);
                Ok(docs)
            }
            Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Stage::Project(fields) => {
                let projection = Projection::Include(fields.clone());
                Ok(docs.iter().map(|d| apply_projection(d, &projection)).collect())
            }
            Stage::Exclude(fields) => {
                let projection = Projection::Exclude(fields.clone());
                Ok(docs.iter().map(|d| apply_projection(d, &projection)).collect())
            }
        }
    }
}

fn parse_group(spec: &Value) -> Result<GroupSpec> {
    let field = required_str(spec, "field", "group_by")?;
    let accumulators = match spec.get("accumulators") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(parse_accumulator)
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(agg_error("group_by.accumulators must be an array")),
    };
    Ok(GroupSpec {
        field,
        accumulators,
    })
}

fn parse_accumulator(spec: &Value) -> Result<Accumulator> {
    let kind = AccumulatorKind::parse(&required_str(spec, "type", "accumulator")?)?;
    let output = required_str(spec, "output", "accumulator")?;
    let field = match spec.get("field") {
        Some(Value::String(f)) => Some(f.clone()),
        None | Some(Value::Null) if kind == AccumulatorKind::Count => None,
        _ => {
            return Err(agg_error(format!(
                "accumulator '{}' needs a field name",
                output
            )))
        }
    };
    Ok(Accumulator {
        kind,
        field,
        output,
    })
}

fn required_str(spec: &Value, key: &str, stage: &str) -> Result<String> {
    spec.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| agg_error(format!("{} requires a string '{}'", stage, key)))
}

fn parse_count(spec: &Value, stage: &str) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| agg_error(format!("{} must be a non-negative integer", stage)))
}

fn parse_fields(spec: &Value, stage: &str) -> Result<Vec<String>> {
    let err = || agg_error(format!("{} expects an array of field names", stage));
    spec.as_array()
        .ok_or_else(err)?
        .iter()
        .map(|f| f.as_str().map(str::to_string).ok_or_else(err))
        .collect()
}

fn agg_error(message: impl Into<String>) -> DocVaultError {
    DocVaultError::AggregationError(message.into())
}

/// Running state of one accumulator within one group
enum AccState<'a> {
    Count(u64),
    Sum { int: Option<i64>, float: f64 },
    Avg { total: f64, n: u64 },
    Extremum(Option<&'a Value>),
}

impl<'a> AccState<'a> {
    fn new(kind: AccumulatorKind) -> Self {
        match kind {
            AccumulatorKind::Count => AccState::Count(0),
            AccumulatorKind::Sum => AccState::Sum {
                int: Some(0),
                float: 0.0,
            },
            AccumulatorKind::Avg => AccState::Avg { total: 0.0, n: 0 },
            AccumulatorKind::Min | AccumulatorKind::Max => AccState::Extremum(None),
        }
    }

    fn add(&mut self, acc: &Accumulator, doc: &'a Value) {
        let value = acc.field.as_deref().and_then(|f| get_nested_value(doc, f));
        match self {
            AccState::Count(n) => {
                if acc.field.is_none() || value.map_or(false, |v| !v.is_null()) {
                    *n += 1;
                }
            }
            AccState::Sum { int, float } => {
                if let Some(Value::Number(num)) = value {
                    *float += num.as_f64().unwrap_or(0.0);
                    *int = match (*int, num.as_i64()) {
                        (Some(total), Some(i)) => total.checked_add(i),
                        _ => None,
                    };
                }
            }
            AccState::Avg { total, n } => {
                if let Some(x) = value.and_then(Value::as_f64) {
                    *total += x;
                    *n += 1;
                }
            }
            AccState::Extremum(current) => {
                let Some(candidate) = value.filter(|v| !v.is_null()) else {
                    return;
                };
                let wanted = if acc.kind == AccumulatorKind::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let replace = match current {
                    None => true,
                    Some(existing) => sort_values(Some(candidate), Some(existing)) == wanted,
                };
                if replace {
                    *current = Some(candidate);
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            AccState::Count(n) => Value::from(n),
            AccState::Sum { int: Some(i), .. } => Value::from(i),
            AccState::Sum { float, .. } => float_value(float),
            AccState::Avg { n: 0, .. } => Value::Null,
            AccState::Avg { total, n } => float_value(total / n as f64),
            AccState::Extremum(value) => value.cloned().unwrap_or(Value::Null),
        }
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Canonical grouping key; integral numbers share one key so `1` and `1.0`
/// land in the same group, as they compare equal in filters
fn group_key(value: &Value) -> String {
    match IndexKey::from_value(value) {
        Some(IndexKey::Int(i)) => i.to_string(),
        _ => value.to_string(),
    }
}

fn execute_group(group: &GroupSpec, docs: &[Value]) -> Vec<Value> {
    // group key -> position, keeping first-seen order
    let mut positions: AHashMap<String, usize> = AHashMap::new();
    let mut groups: Vec<(Value, Vec<AccState<'_>>)> = Vec::new();

    for doc in docs {
        let key_value = get_nested_value(doc, &group.field)
            .cloned()
            .unwrap_or(Value::Null);
        let key = group_key(&key_value);
        let slot = *positions.entry(key).or_insert_with(|| {
            groups.push((
                key_value,
                group
                    .accumulators
                    .iter()
                    .map(|acc| AccState::new(acc.kind))
                    .collect(),
            ));
            groups.len() - 1
        });

        for (state, acc) in groups[slot].1.iter_mut().zip(&group.accumulators) {
            state.add(acc, doc);
        }
    }

    groups
        .into_iter()
        .map(|(key, states)| {
            let mut out = Value::Object(Map::new());
            set_nested_value(&mut out, &group.field, key);
            for (state, acc) in states.into_iter().zip(&group.accumulators) {
                set_nested_value(&mut out, &acc.output, state.finish());
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales() -> Vec<Value> {
        vec![
            json!({"city": "A", "amt": 10, "qty": 1.5}),
            json!({"city": "A", "amt": 5, "qty": 2}),
            json!({"city": "B", "amt": 7}),
            json!({"amt": 3, "qty": "n/a"}),
        ]
    }

    #[test]
    fn test_group_sum_is_exhaustive() {
        let out = Pipeline::new()
            .group_by("city")
            .sum("amt", "total")
            .execute(sales())
            .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"city": "A", "total": 15}),
                json!({"city": "B", "total": 7}),
                json!({"city": null, "total": 3}),
            ]
        );
    }

    #[test]
    fn test_all_accumulators() {
        let out = Pipeline::new()
            .match_filter("city exists")
            .group_by("city")
            .count("n")
            .sum("qty", "qty_sum")
            .avg("amt", "avg_amt")
            .min("amt", "min_amt")
            .max("qty", "max_qty")
            .sort("city", true)
            .execute(sales())
            .unwrap();

        assert_eq!(out[0]["n"], 2);
        assert_eq!(out[0]["qty_sum"], json!(3.5));
        assert_eq!(out[0]["avg_amt"], json!(7.5));
        assert_eq!(out[0]["min_amt"], 5);
        assert_eq!(out[0]["max_qty"], 2);

        assert_eq!(out[1]["n"], 1);
        assert_eq!(out[1]["qty_sum"], 0);
        assert_eq!(out[1]["max_qty"], Value::Null);
    }

    #[test]
    fn test_group_merges_equal_numbers() {
        let docs = vec![
            json!({"tier": 1, "amt": 2}),
            json!({"tier": 1.0, "amt": 3}),
            json!({"tier": "1", "amt": 4}),
            json!({"tier": 1.5, "amt": 5}),
        ];
        let out = Pipeline::new()
            .group_by("tier")
            .sum("amt", "total")
            .execute(docs)
            .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"tier": 1, "total": 5}),
                json!({"tier": "1", "total": 4}),
                json!({"tier": 1.5, "total": 5}),
            ]
        );
    }

    #[test]
    fn test_stages_run_in_definition_order() {
        let docs: Vec<Value> = (1..=5).map(|n| json!({"n": n})).collect();
        let skip_then_limit = Pipeline::new().skip(1).limit(2).execute(docs.clone()).unwrap();
        assert_eq!(skip_then_limit, vec![json!({"n": 2}), json!({"n": 3})]);

        let limit_then_skip = Pipeline::new().limit(2).skip(1).execute(docs).unwrap();
        assert_eq!(limit_then_skip, vec![json!({"n": 2})]);
    }

    #[test]
    fn test_from_json() {
        let pipeline = Pipeline::from_json(&json!([
            {"match": "amt >= 5"},
            {"group_by": {"field": "city", "accumulators": [
                {"type": "sum", "field": "amt", "output": "total"},
                {"type": "count", "output": "n"}
            ]}},
            {"sort": {"field": "total", "ascending": false}},
            {"limit": 1},
            {"project": ["total"]}
        ]))
        .unwrap();
        assert_eq!(pipeline.len(), 5);
        assert_eq!(pipeline.leading_match(), Some("amt >= 5"));

        let out = pipeline.execute(sales()).unwrap();
        assert_eq!(out, vec![json!({"total": 15})]);
    }

    #[test]
    fn test_from_json_errors() {
        for bad in [
            json!({"match": "x"}),
            json!([{"match": "x >"}]),
            json!([{"match": "x is 1", "limit": 2}]),
            json!([{"unwind": "tags"}]),
            json!([{"limit": -1}]),
            json!([{"group_by": {"accumulators": []}}]),
            json!([{"group_by": {"field": "c", "accumulators": [{"type": "median", "field": "a", "output": "m"}]}}]),
            json!([{"group_by": {"field": "c", "accumulators": [{"type": "sum", "output": "s"}]}}]),
            json!([{"project": "name"}]),
        ] {
            assert!(Pipeline::from_json(&bad).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn test_accumulator_without_group_fails() {
        let result = Pipeline::new().sum("amt", "total").execute(sales());
        assert!(matches!(result, Err(DocVaultError::AggregationError(_))));
    }

    #[test]
    fn test_exclude_and_empty_pipeline() {
        let out = Pipeline::new().exclude(&["qty"]).execute(sales()).unwrap();
        assert!(out.iter().all(|d| d.get("qty").is_none()));
        assert_eq!(Pipeline::new().execute(sales()).unwrap(), sales());
    }
}
