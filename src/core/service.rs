//! The data source trait executed by repositories

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;

use crate::core::error::Result;
use crate::core::field::{compare_values, lookup};
use crate::core::query::{Page, PaginationMeta, Query};
use crate::core::record::Record;

/// Aggregate functions available through [`Operation::Aggregate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    /// Reduce plucked column values. Nulls are ignored.
    pub fn reduce(&self, values: &[Value]) -> Value {
        let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
        let numbers = || present.iter().filter_map(|v| v.as_f64());

        match self {
            Aggregate::Count => Value::from(present.len()),
            Aggregate::Sum => Value::from(numbers().sum::<f64>()),
            Aggregate::Avg => {
                let (sum, count) = numbers().fold((0.0, 0usize), |(s, c), n| (s + n, c + 1));
                if count == 0 {
                    Value::Null
                } else {
                    Value::from(sum / count as f64)
                }
            }
            Aggregate::Min => extreme(&present, Ordering::Less),
            Aggregate::Max => extreme(&present, Ordering::Greater),
        }
    }
}

fn extreme(values: &[&Value], wanted: Ordering) -> Value {
    values
        .iter()
        .copied()
        .reduce(|best, candidate| {
            if compare_values(candidate, best) == Some(wanted) {
                candidate
            } else {
                best
            }
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// Ad hoc operations run through `Repository::execute` after criteria and
/// scope have been applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Exists,
    Pluck { column: String },
    Aggregate { function: Aggregate, field: String },
}

/// A queryable, mutable collection of records of type `R`
///
/// Implementations execute a [`Query`] handle against their storage. Every
/// single-record mutation returns the affected record so the repository can
/// attach it to the mutation event it raises. Mutations of a missing id fail
/// with `NotFound`; storage failures surface as `PersistenceFailure`.
#[async_trait]
pub trait DataSource<R: Record>: Send + Sync {
    /// Fetch every record matching the query, honouring order, limit and offset
    async fn get(&self, query: &Query) -> Result<Vec<R>>;

    /// Count the records matching the query's filters
    async fn count(&self, query: &Query) -> Result<usize>;

    /// Fetch the first matching record
    async fn first(&self, query: &Query) -> Result<Option<R>> {
        let limited = query.clone().limit(1);
        Ok(self.get(&limited).await?.into_iter().next())
    }

    /// Fetch a matching record by id
    async fn find(&self, query: &Query, id: Uuid) -> Result<Option<R>> {
        let by_id = query.clone().where_eq("id", id.to_string());
        self.first(&by_id).await
    }

    /// Fetch one page of matching records plus pagination metadata
    async fn paginate(&self, query: &Query, per_page: usize, page: usize) -> Result<Page<R>> {
        let total = self.count(&query.clone().without_window()).await?;
        let pagination = PaginationMeta::new(page, per_page, total);
        let window = query
            .clone()
            .offset(pagination.offset())
            .limit(pagination.limit);
        let data = self.get(&window).await?;
        Ok(Page { data, pagination })
    }

    /// Fetch one page without counting the full result set
    async fn simple_paginate(&self, query: &Query, per_page: usize, page: usize) -> Result<Page<R>> {
        let requested = PaginationMeta::simple(page, per_page, false);
        let window = query
            .clone()
            .offset(requested.offset())
            .limit(requested.limit.saturating_add(1));
        let mut data = self.get(&window).await?;
        let has_next = data.len() > requested.limit;
        data.truncate(requested.limit);
        Ok(Page {
            data,
            pagination: PaginationMeta::simple(page, per_page, has_next),
        })
    }

    /// Values of one (possibly dotted) column across matching records
    async fn pluck(&self, query: &Query, column: &str) -> Result<Vec<Value>> {
        self.get(query)
            .await?
            .iter()
            .map(|record| {
                let row = record.to_json()?;
                Ok(lookup(&row, column).cloned().unwrap_or(Value::Null))
            })
            .collect()
    }

    async fn aggregate(&self, query: &Query, function: Aggregate, field: &str) -> Result<Value> {
        let values = self.pluck(query, field).await?;
        Ok(function.reduce(&values))
    }

    async fn exists(&self, query: &Query) -> Result<bool> {
        Ok(self.count(query).await? > 0)
    }

    /// Persist a new record
    async fn create(&self, record: R) -> Result<R>;

    /// Persist several records at once, returning how many were written
    async fn insert(&self, records: Vec<R>) -> Result<usize>;

    /// Merge `attributes` into the matching record with `id`
    async fn update(&self, query: &Query, id: Uuid, attributes: Value) -> Result<R>;

    /// Merge `attributes` into every matching record
    async fn update_where(&self, query: &Query, attributes: Value) -> Result<usize>;

    /// Delete the matching record with `id` (soft delete when supported)
    async fn delete(&self, query: &Query, id: Uuid) -> Result<R>;

    /// Delete every matching record (soft delete when supported)
    async fn delete_where(&self, query: &Query) -> Result<usize>;

    /// Permanently remove the matching record with `id`
    async fn force_delete(&self, query: &Query, id: Uuid) -> Result<R>;

    /// Clear the deletion stamp of the matching record with `id`
    async fn restore(&self, query: &Query, id: Uuid) -> Result<R>;
}
