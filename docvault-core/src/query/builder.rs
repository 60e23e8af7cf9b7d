// query/builder.rs
// Fluent query construction and execution

use std::sync::Arc;

use ahash::AHashSet;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::find_options::{
    apply_projection, apply_sort, projection_from_parts, FindOptions, Projection, SortOrder,
};
use crate::value_utils::get_nested_value;

use super::{Filter, QueryPlan};

/// Something a query can run against: a transaction's view of one
/// collection, or a collection handle reading the latest snapshot.
pub trait QuerySource {
    /// Parse (or fetch from cache) a filter expression
    fn compile(&self, filter: &str) -> Result<Arc<Filter>>;

    /// Visit documents matching `filter` in id order until `visit` returns
    /// false
    fn scan(&self, filter: Option<&Filter>, visit: &mut dyn FnMut(&Value) -> bool) -> Result<()>;

    fn plan(&self, filter: Option<&Filter>) -> Result<QueryPlan>;
}

/// Query under construction
///
/// ```no_run
/// use docvault_core::{Database, SortOrder};
///
/// # fn main() -> docvault_core::Result<()> {
/// let db = Database::open("app.db")?;
/// let adults = db
///     .collection("users")?
///     .query()
///     .filter("age >= 18 and status is active")
///     .sort_by("age", SortOrder::Descending)
///     .limit(10)
///     .project(&["name", "age"])
///     .all()?;
/// # Ok(())
/// # }
/// ```
pub struct QueryBuilder<S> {
    source: S,
    filter: Option<String>,
    sort: Option<(String, SortOrder)>,
    skip: usize,
    limit: Option<usize>,
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
}

impl<S: QuerySource> QueryBuilder<S> {
    pub fn new(source: S) -> Self {
        QueryBuilder {
            source,
            filter: None,
            sort: None,
            skip: 0,
            limit: None,
            include: None,
            exclude: None,
        }
    }

    pub fn filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }

    pub fn sort_by(mut self, field: &str, order: SortOrder) -> Self {
        self.sort = Some((field.to_string(), order));
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Keep only these fields (`_id` is always kept)
    pub fn project(mut self, fields: &[&str]) -> Self {
        self.include = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Drop these fields; cannot be combined with [`project`](Self::project)
    pub fn exclude(mut self, fields: &[&str]) -> Self {
        self.exclude = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Take sort, skip, limit and projection from `options`
    pub fn options(mut self, options: FindOptions) -> Self {
        self.sort = options.sort;
        self.skip = options.skip.unwrap_or(0);
        self.limit = options.limit;
        match options.projection {
            Some(Projection::Include(fields)) => self.include = Some(fields),
            Some(Projection::Exclude(fields)) => self.exclude = Some(fields),
            None => {}
        }
        self
    }

    fn compiled(&self) -> Result<Option<Arc<Filter>>> {
        self.filter
            .as_deref()
            .map(|src| self.source.compile(src))
            .transpose()
    }

    fn projection(&self) -> Result<Option<Projection>> {
        projection_from_parts(self.include.clone(), self.exclude.clone())
    }

    /// Every matching document after sort, skip, limit and projection
    pub fn all(&self) -> Result<Vec<Value>> {
        let projection = self.projection()?;
        let filter = self.compiled()?;
        let limit = self.limit.unwrap_or(usize::MAX);

        let mut docs = Vec::new();
        match &self.sort {
            Some((field, order)) => {
                self.source.scan(filter.as_deref(), &mut |doc| {
                    docs.push(doc.clone());
                    true
                })?;
                apply_sort(&mut docs, field, *order);
                docs = docs.into_iter().skip(self.skip).take(limit).collect();
            }
            None => {
                if limit == 0 {
                    return Ok(docs);
                }
                let mut skipped = 0;
                self.source.scan(filter.as_deref(), &mut |doc| {
                    if skipped < self.skip {
                        skipped += 1;
                        return true;
                    }
                    docs.push(doc.clone());
                    docs.len() < limit
                })?;
            }
        }

        if let Some(projection) = &projection {
            for doc in docs.iter_mut() {
                *doc = apply_projection(doc, projection);
            }
        }
        Ok(docs)
    }

    pub fn all_typed<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.all()?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .collect()
    }

    /// First result; without a sort the scan stops at the first match
    pub fn first(&self) -> Result<Option<Value>> {
        let projection = self.projection()?;
        if matches!(self.limit, Some(0)) {
            return Ok(None);
        }

        let doc = if self.sort.is_some() {
            let mut all = self.sort_only()?;
            if self.skip < all.len() {
                Some(all.swap_remove(self.skip))
            } else {
                None
            }
        } else {
            let filter = self.compiled()?;
            let mut skipped = 0;
            let mut found = None;
            self.source.scan(filter.as_deref(), &mut |doc| {
                if skipped < self.skip {
                    skipped += 1;
                    return true;
                }
                found = Some(doc.clone());
                false
            })?;
            found
        };

        Ok(match (doc, &projection) {
            (Some(doc), Some(projection)) => Some(apply_projection(&doc, projection)),
            (doc, _) => doc,
        })
    }

    fn sort_only(&self) -> Result<Vec<Value>> {
        let filter = self.compiled()?;
        let mut docs = Vec::new();
        self.source.scan(filter.as_deref(), &mut |doc| {
            docs.push(doc.clone());
            true
        })?;
        if let Some((field, order)) = &self.sort {
            apply_sort(&mut docs, field, *order);
        }
        Ok(docs)
    }

    /// Number of results after skip and limit, without collecting them
    pub fn count(&self) -> Result<usize> {
        let filter = self.compiled()?;
        let cap = self
            .limit
            .map_or(usize::MAX, |limit| self.skip.saturating_add(limit));
        let mut matched = 0usize;
        if cap > 0 {
            self.source.scan(filter.as_deref(), &mut |_| {
                matched += 1;
                matched < cap
            })?;
        }
        Ok(matched.saturating_sub(self.skip))
    }

    /// Unique values of `field` across every filter match.
    ///
    /// Sort, skip, limit and projection do not apply. Array values
    /// contribute each element.
    pub fn distinct(&self, field: &str) -> Result<Vec<Value>> {
        let filter = self.compiled()?;
        let mut collector = DistinctCollector::default();
        self.source.scan(filter.as_deref(), &mut |doc| {
            collector.add(get_nested_value(doc, field));
            true
        })?;
        Ok(collector.values)
    }

    pub fn count_distinct(&self, field: &str) -> Result<usize> {
        Ok(self.distinct(field)?.len())
    }

    /// Plan the filter would run with
    pub fn explain(&self) -> Result<QueryPlan> {
        let filter = self.compiled()?;
        self.source.plan(filter.as_deref())
    }
}

/// Deduplicates values by canonical JSON text, keeping first-seen order
#[derive(Default)]
pub(crate) struct DistinctCollector {
    seen: AHashSet<String>,
    pub(crate) values: Vec<Value>,
}

impl DistinctCollector {
    pub(crate) fn add(&mut self, value: Option<&Value>) {
        match value {
            None => {}
            Some(Value::Array(items)) => {
                for item in items {
                    self.add_one(item);
                }
            }
            Some(value) => self.add_one(value),
        }
    }

    fn add_one(&mut self, value: &Value) {
        if self.seen.insert(value.to_string()) {
            self.values.push(value.clone());
        }
    }
}
