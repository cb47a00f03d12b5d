//! In-memory implementation of DataSource for testing and development

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::core::error::{RepositoryError, Result};
use crate::core::query::Query;
use crate::core::record::Record;
use crate::core::service::DataSource;
use crate::storage::evaluate::{compare_rows, matches, visible};

/// In-memory data source
///
/// Records are kept in insertion order and evaluated through their JSON
/// form. Useful for testing and development. Uses RwLock for thread-safe
/// access.
pub struct InMemoryDataSource<R: Record> {
    records: Arc<RwLock<IndexMap<Uuid, R>>>,
}

impl<R: Record> Clone for InMemoryDataSource<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<R: Record> InMemoryDataSource<R> {
    /// Create a new, empty in-memory data source
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Create a data source seeded with `records`
    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let map = records
            .into_iter()
            .map(|record| (record.id(), record))
            .collect();
        Self {
            records: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of stored records, trashed ones included
    pub fn len(&self) -> usize {
        self.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw lookup by id, ignoring soft-delete visibility
    pub fn get_raw(&self, id: Uuid) -> Option<R> {
        self.read().ok().and_then(|records| records.get(&id).cloned())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexMap<Uuid, R>>> {
        self.records.read().map_err(|e| {
            RepositoryError::persistence(
                R::resource_name(),
                "read",
                format!("Failed to acquire read lock: {}", e),
            )
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexMap<Uuid, R>>> {
        self.records.write().map_err(|e| {
            RepositoryError::persistence(
                R::resource_name(),
                "write",
                format!("Failed to acquire write lock: {}", e),
            )
        })
    }
}

impl<R: Record> Default for InMemoryDataSource<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Matching records in query order, honouring offset and limit
fn select<R: Record>(records: &IndexMap<Uuid, R>, query: &Query) -> Result<Vec<R>> {
    let mut rows = Vec::new();
    for record in records.values() {
        if R::SOFT_DELETES && !visible(query.trashed(), record.is_trashed()) {
            continue;
        }
        let row = record.to_json()?;
        if matches(query, &row)? {
            rows.push((record, row));
        }
    }

    if !query.orders().is_empty() {
        rows.sort_by(|(_, left), (_, right)| compare_rows(left, right, query.orders()));
    }

    Ok(rows
        .into_iter()
        .skip(query.offset_value().unwrap_or(0))
        .take(query.limit_value().unwrap_or(usize::MAX))
        .map(|(record, _)| record.clone())
        .collect())
}

/// The record with `id`, provided it matches `query`
fn locate<R: Record>(records: &IndexMap<Uuid, R>, query: &Query, id: Uuid) -> Result<R> {
    let by_id = query.clone().where_eq("id", id.to_string());
    select(records, &by_id)?
        .into_iter()
        .next()
        .ok_or_else(|| RepositoryError::NotFound {
            resource: R::resource_name().to_string(),
            id: id.to_string(),
        })
}

/// Shallow-merge `attributes` into `record`; the id cannot be changed
fn merge<R: Record>(record: &R, attributes: &Value) -> Result<R> {
    let changes = attributes.as_object().ok_or_else(|| {
        RepositoryError::invalid_condition("attributes", "must be a JSON object")
    })?;
    let mut row = record.to_json()?;
    if let Some(target) = row.as_object_mut() {
        for (key, value) in changes.iter().filter(|(key, _)| key.as_str() != "id") {
            target.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(row).map_err(|e| {
        RepositoryError::persistence(R::resource_name(), "update", e.to_string())
    })
}

#[async_trait]
impl<R: Record> DataSource<R> for InMemoryDataSource<R> {
    async fn get(&self, query: &Query) -> Result<Vec<R>> {
        let records = self.read()?;
        select(&records, query)
    }

    async fn count(&self, query: &Query) -> Result<usize> {
        let records = self.read()?;
        Ok(select(&records, &query.clone().without_window())?.len())
    }

    async fn create(&self, record: R) -> Result<R> {
        let mut records = self.write()?;
        if records.contains_key(&record.id()) {
            return Err(RepositoryError::persistence(
                R::resource_name(),
                "create",
                format!("id '{}' already exists", record.id()),
            ));
        }
        records.insert(record.id(), record.clone());
        Ok(record)
    }

    async fn insert(&self, batch: Vec<R>) -> Result<usize> {
        let mut records = self.write()?;
        let mut seen = std::collections::HashSet::new();
        for record in &batch {
            if records.contains_key(&record.id()) || !seen.insert(record.id()) {
                return Err(RepositoryError::persistence(
                    R::resource_name(),
                    "insert",
                    format!("id '{}' already exists", record.id()),
                ));
            }
        }
        let count = batch.len();
        records.extend(batch.into_iter().map(|record| (record.id(), record)));
        Ok(count)
    }

    async fn update(&self, query: &Query, id: Uuid, attributes: Value) -> Result<R> {
        let mut records = self.write()?;
        let current = locate(&records, query, id)?;
        let updated = merge(&current, &attributes)?;
        records.insert(id, updated.clone());
        Ok(updated)
    }

    async fn update_where(&self, query: &Query, attributes: Value) -> Result<usize> {
        let mut records = self.write()?;
        let targets = select(&records, query)?;
        for current in &targets {
            let updated = merge(current, &attributes)?;
            records.insert(current.id(), updated);
        }
        Ok(targets.len())
    }

    async fn delete(&self, query: &Query, id: Uuid) -> Result<R> {
        let mut records = self.write()?;
        let mut current = locate(&records, query, id)?;
        if R::SOFT_DELETES {
            current.set_deleted_at(Some(Utc::now()));
            records.insert(id, current.clone());
        } else {
            records.shift_remove(&id);
        }
        Ok(current)
    }

    async fn delete_where(&self, query: &Query) -> Result<usize> {
        let mut records = self.write()?;
        let targets = select(&records, query)?;
        let now = Utc::now();
        for mut current in targets.iter().cloned() {
            if R::SOFT_DELETES {
                current.set_deleted_at(Some(now));
                records.insert(current.id(), current);
            } else {
                records.shift_remove(&current.id());
            }
        }
        Ok(targets.len())
    }

    async fn force_delete(&self, query: &Query, id: Uuid) -> Result<R> {
        let mut records = self.write()?;
        let current = locate(&records, query, id)?;
        records.shift_remove(&id);
        Ok(current)
    }

    async fn restore(&self, query: &Query, id: Uuid) -> Result<R> {
        let mut records = self.write()?;
        let mut current = locate(&records, query, id)?;
        current.set_deleted_at(None);
        records.insert(id, current.clone());
        Ok(current)
    }
}
