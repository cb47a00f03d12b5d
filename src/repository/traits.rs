//! Read and write surfaces shared by repositories and their decorators

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::core::condition::Condition;
use crate::core::error::Result;
use crate::core::query::Page;
use crate::core::record::Record;

/// The cacheable read operations
#[async_trait]
pub trait ReadRepository<R: Record>: Send {
    /// Repository name, which is also its cache group
    fn name(&self) -> &str;

    async fn all(&mut self) -> Result<Vec<R>>;

    /// `per_page` falls back to the configured pagination limit
    async fn paginate(&mut self, per_page: Option<usize>, page: usize) -> Result<Page<R>>;

    /// Fails with `NotFound` when no record matches
    async fn find(&mut self, id: Uuid) -> Result<R>;

    async fn find_by_field(&mut self, field: &str, value: Value) -> Result<Vec<R>>;

    async fn find_where(&mut self, conditions: &[Condition]) -> Result<Vec<R>>;
}

/// The event-raising write operations
#[async_trait]
pub trait WriteRepository<R: Record>: Send {
    async fn create(&mut self, record: R) -> Result<R>;

    async fn update(&mut self, id: Uuid, attributes: Value) -> Result<R>;

    async fn delete(&mut self, id: Uuid) -> Result<R>;

    async fn force_delete(&mut self, id: Uuid) -> Result<R>;

    async fn restore(&mut self, id: Uuid) -> Result<R>;
}
