// src/query/mod.rs
//! Filter language
//!
//! Filters are written as text (`age >= 18 and status is 'active'`), parsed
//! once into a [`Filter`] tree and then evaluated against any number of
//! documents.
//!
//! Semantics:
//! - a missing field reads as `null`; `exists` means present and non-null
//! - `is` / `is not` compare with numeric-aware equality (`1 is 1.0`)
//! - ordering operators only compare number with number or string with
//!   string; any other pairing is false
//! - `has`, `has any`, `has all` test array membership
//! - `contains` is a substring test on string fields

mod builder;
pub mod lexer;
pub mod parser;
pub mod planner;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{DocVaultError, Result};
use crate::value_utils::{compare_values, get_nested_value, values_equal};

pub use builder::{QueryBuilder, QuerySource};
pub use parser::parse_filter;
pub use planner::{QueryPlan, QueryPlanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "is",
            CompareOp::Ne => "is not",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasMode {
    One,
    Any,
    All,
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    Exists {
        field: String,
        negated: bool,
    },
    Has {
        field: String,
        mode: HasMode,
        values: Vec<Value>,
    },
    Contains {
        field: String,
        text: String,
    },
}

static NULL: Value = Value::Null;

impl Filter {
    pub fn parse(src: &str) -> Result<Self> {
        parse_filter(src)
    }

    /// Evaluate against a document
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|f| f.matches(doc)),
            Filter::Or(branches) => branches.iter().any(|f| f.matches(doc)),
            Filter::Not(inner) => !inner.matches(doc),
            Filter::Compare { field, op, value } => {
                let actual = field_value(doc, field);
                match op {
                    CompareOp::Eq => values_equal(actual, value),
                    CompareOp::Ne => !values_equal(actual, value),
                    CompareOp::Gt => ordered(actual, value) == Some(Ordering::Greater),
                    CompareOp::Gte => matches!(
                        ordered(actual, value),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    CompareOp::Lt => ordered(actual, value) == Some(Ordering::Less),
                    CompareOp::Lte => matches!(
                        ordered(actual, value),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                }
            }
            Filter::Exists { field, negated } => {
                let exists = !field_value(doc, field).is_null();
                exists != *negated
            }
            Filter::Has {
                field,
                mode,
                values,
            } => {
                let Value::Array(items) = field_value(doc, field) else {
                    return false;
                };
                let contains = |needle: &Value| items.iter().any(|v| values_equal(v, needle));
                match mode {
                    HasMode::One | HasMode::Any => values.iter().any(contains),
                    HasMode::All => values.iter().all(contains),
                }
            }
            Filter::Contains { field, text } => match field_value(doc, field) {
                Value::String(s) => s.contains(text.as_str()),
                _ => false,
            },
        }
    }

    /// Top-level conjuncts (a non-`And` filter is its own single conjunct)
    pub fn conjuncts(&self) -> Vec<&Filter> {
        match self {
            Filter::And(parts) => parts.iter().flat_map(Filter::conjuncts).collect(),
            other => vec![other],
        }
    }
}

impl FromStr for Filter {
    type Err = DocVaultError;

    fn from_str(s: &str) -> Result<Self> {
        parse_filter(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, parts: &[Filter], sep: &str) -> fmt::Result {
            f.write_str("(")?;
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", part)?;
            }
            f.write_str(")")
        }

        match self {
            Filter::And(parts) => join(f, parts, "and"),
            Filter::Or(parts) => join(f, parts, "or"),
            Filter::Not(inner) => write!(f, "not {}", inner),
            Filter::Compare { field, op, value } => {
                write!(f, "{} {} {}", field, op.as_str(), value)
            }
            Filter::Exists { field, negated } => {
                write!(f, "{} {}", field, if *negated { "not exists" } else { "exists" })
            }
            Filter::Has {
                field,
                mode,
                values,
            } => {
                let list = values
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                match mode {
                    HasMode::One => write!(f, "{} has {}", field, list),
                    HasMode::Any => write!(f, "{} has any [{}]", field, list),
                    HasMode::All => write!(f, "{} has all [{}]", field, list),
                }
            }
            Filter::Contains { field, text } => write!(f, "{} contains {:?}", field, text),
        }
    }
}

fn field_value<'a>(doc: &'a Value, field: &str) -> &'a Value {
    get_nested_value(doc, field).unwrap_or(&NULL)
}

/// Ordering restricted to number/number and string/string
fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            compare_values(a, b)
        }
        _ => None,
    }
}
