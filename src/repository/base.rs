//! The repository: criteria, scope and conditions over a data source

use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::core::condition::{Condition, ConditionCompiler};
use crate::core::criteria::{CriteriaChain, CriteriaRegistry, Criterion, RepositoryInfo};
use crate::core::error::{RepositoryError, Result};
use crate::core::events::{EventBus, MutationAction, MutationEvent};
use crate::core::query::{Direction, Page, Predicate, Query};
use crate::core::record::Record;
use crate::core::service::{DataSource, Operation};
use crate::repository::traits::{ReadRepository, WriteRepository};

/// Ad hoc transformation applied after criteria, until `reset_scope`
pub type Scope = Arc<dyn Fn(Query) -> Query + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteMode {
    Delete,
    Force,
    Restore,
}

/// Orchestrates a data source, a criteria chain, an optional scope and
/// per-call conditions.
///
/// Every operation takes the held handle at its start, so the handle is
/// fresh for the next call whether the operation succeeds or fails. Read
/// operations run `criteria → scope → conditions`; write operations run
/// `scope → conditions` and raise a [`MutationEvent`] once committed.
///
/// ```rust,ignore
/// let source = Arc::new(InMemoryDataSource::<Post>::new());
/// let mut posts = Repository::new(source, EventBus::default()).named("posts");
///
/// posts.push_criterion(Published);
/// let latest = posts.order_by("created_at", Direction::Desc).take(5).all().await?;
/// ```
pub struct Repository<R: Record, S: DataSource<R>> {
    name: String,
    source: Arc<S>,
    events: EventBus,
    registry: Arc<CriteriaRegistry>,
    criteria: CriteriaChain,
    handle: Query,
    scope: Option<Scope>,
    skip_criteria: bool,
    per_page: usize,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record, S: DataSource<R>> Repository<R, S> {
    /// Create a repository named `<resource>_repository`
    pub fn new(source: Arc<S>, events: EventBus) -> Self {
        Self {
            name: format!("{}_repository", R::resource_name()),
            source,
            events,
            registry: Arc::new(CriteriaRegistry::new()),
            criteria: CriteriaChain::new(),
            handle: Query::new(),
            scope: None,
            skip_criteria: false,
            per_page: RepositoryConfig::default().pagination.limit,
            _record: PhantomData,
        }
    }

    /// Set the repository name, which is also its cache group
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: &RepositoryConfig) -> Self {
        self.per_page = config.pagination.limit.max(1);
        self
    }

    /// Alias table used by `push_criterion_named`
    pub fn with_criteria_registry(mut self, registry: Arc<CriteriaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> RepositoryInfo {
        RepositoryInfo {
            name: self.name.clone(),
            resource: R::resource_name(),
            soft_deletes: R::SOFT_DELETES,
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Default page size
    pub fn per_page(&self) -> usize {
        self.per_page
    }

    /// Modifiers waiting for the next operation
    pub fn pending_query(&self) -> &Query {
        &self.handle
    }

    // === Criteria ===

    pub fn push_criterion<C: Criterion>(&mut self, criterion: C) -> &mut Self {
        self.criteria.push(Box::new(criterion));
        self
    }

    pub fn push_boxed_criterion(&mut self, criterion: Box<dyn Criterion>) -> &mut Self {
        self.criteria.push(criterion);
        self
    }

    /// Instantiate the criterion registered under `alias` and push it
    pub fn push_criterion_named(&mut self, alias: &str) -> Result<&mut Self> {
        let criterion = self.registry.make(alias)?;
        self.criteria.push(criterion);
        Ok(self)
    }

    /// Remove every criterion of type `C`
    pub fn pop_criterion<C: Criterion>(&mut self) -> &mut Self {
        let removed = self.criteria.remove_type::<C>();
        debug!(repository = %self.name, removed, "criteria popped by type");
        self
    }

    /// Remove every criterion of the same type as `criterion`
    pub fn pop_criterion_like(&mut self, criterion: &dyn Criterion) -> &mut Self {
        self.criteria.remove_like(criterion);
        self
    }

    /// Remove every criterion registered as `alias` (or whose name is `alias`)
    pub fn pop_criterion_named(&mut self, alias: &str) -> &mut Self {
        match self.registry.make(alias) {
            Ok(instance) => self.criteria.remove_like(instance.as_ref()),
            Err(_) => self.criteria.remove_named(alias),
        };
        self
    }

    pub fn criteria(&self) -> &CriteriaChain {
        &self.criteria
    }

    pub fn reset_criteria(&mut self) -> &mut Self {
        self.criteria.clear();
        self
    }

    /// While set, `apply_criteria` leaves the handle untouched
    pub fn skip_criteria(&mut self, skip: bool) -> &mut Self {
        self.skip_criteria = skip;
        self
    }

    pub fn is_skipping_criteria(&self) -> bool {
        self.skip_criteria
    }

    /// Fold the chain over `query` in insertion order
    pub fn apply_criteria(&self, query: Query) -> Result<Query> {
        if self.skip_criteria {
            return Ok(query);
        }
        self.criteria.apply(query, &self.info())
    }

    // === Scope ===

    pub fn scope_query(
        &mut self,
        scope: impl Fn(Query) -> Query + Send + Sync + 'static,
    ) -> &mut Self {
        self.scope = Some(Arc::new(scope));
        self
    }

    pub fn reset_scope(&mut self) -> &mut Self {
        self.scope = None;
        self
    }

    pub fn apply_scope(&self, query: Query) -> Query {
        match &self.scope {
            Some(scope) => scope(query),
            None => query,
        }
    }

    // === Handle modifiers ===

    pub fn order_by(&mut self, column: impl Into<String>, direction: Direction) -> &mut Self {
        self.handle = mem::take(&mut self.handle).order_by(column, direction);
        self
    }

    pub fn take(&mut self, limit: usize) -> &mut Self {
        self.handle = mem::take(&mut self.handle).limit(limit);
        self
    }

    /// Require at least one related row through `relation`
    pub fn has(&mut self, relation: impl Into<String>) -> &mut Self {
        self.handle = mem::take(&mut self.handle).where_has(relation, Query::new());
        self
    }

    /// Require at least one related row matching `predicate`
    pub fn where_has(&mut self, relation: impl Into<String>, predicate: Predicate) -> &mut Self {
        self.handle = mem::take(&mut self.handle).where_has(relation, predicate.build());
        self
    }

    pub fn reset_handle(&mut self) -> &mut Self {
        self.handle = Query::new();
        self
    }

    /// The query the next read would run, without consuming the handle
    pub fn prepared_query(&self) -> Result<Query> {
        let query = self.apply_criteria(self.handle.clone())?;
        Ok(self.apply_scope(query))
    }

    /// Take the held handle and run it through criteria, scope and conditions
    fn prepare(&mut self, conditions: &[Condition]) -> Result<Query> {
        let handle = mem::take(&mut self.handle);
        let query = self.apply_criteria(handle)?;
        let query = self.apply_scope(query);
        ConditionCompiler::compile(query, conditions)
    }

    /// Take the held handle and run it through the scope only
    fn prepare_scoped(&mut self, conditions: &[Condition]) -> Result<Query> {
        let handle = mem::take(&mut self.handle);
        ConditionCompiler::compile(self.apply_scope(handle), conditions)
    }

    /// Equality conditions from an attribute object; the handle is dropped
    /// when the attributes are malformed
    fn attribute_conditions(&mut self, attributes: &Value) -> Result<Vec<Condition>> {
        Condition::list_from_attributes(attributes).map_err(|err| {
            self.reset_handle();
            err
        })
    }

    fn require_soft_deletes(&self, operation: &str) -> Result<()> {
        if R::SOFT_DELETES {
            Ok(())
        } else {
            Err(RepositoryError::capability_missing(
                R::resource_name(),
                operation,
            ))
        }
    }

    async fn emit(&self, action: MutationAction, record: Option<&R>) {
        let record = match record.map(Record::to_json).transpose() {
            Ok(record) => record,
            Err(err) => {
                warn!(repository = %self.name, error = %err, "mutation event sent without record");
                None
            }
        };
        self.events
            .publish(MutationEvent::new(
                &self.name,
                R::resource_name(),
                action,
                record,
            ))
            .await;
    }

    // === Reads ===

    pub async fn all(&mut self) -> Result<Vec<R>> {
        let query = self.prepare(&[])?;
        self.source.get(&query).await
    }

    /// Alias of [`Repository::all`]
    pub async fn get(&mut self) -> Result<Vec<R>> {
        self.all().await
    }

    pub async fn first(&mut self) -> Result<Option<R>> {
        let query = self.prepare(&[])?;
        self.source.first(&query).await
    }

    /// First record matching `attributes`, or an unsaved record built from them
    pub async fn first_or_new(&mut self, attributes: Value) -> Result<R> {
        let conditions = self.attribute_conditions(&attributes)?;
        let query = self.prepare(&conditions)?;
        match self.source.first(&query).await? {
            Some(record) => Ok(record),
            None => R::from_attributes(attributes),
        }
    }

    /// First record matching `attributes`, or a new record persisted from them
    pub async fn first_or_create(&mut self, attributes: Value) -> Result<R> {
        let conditions = self.attribute_conditions(&attributes)?;
        let query = self.prepare(&conditions)?;
        if let Some(record) = self.source.first(&query).await? {
            return Ok(record);
        }
        let created = self.source.create(R::from_attributes(attributes)?).await?;
        self.emit(MutationAction::Created, Some(&created)).await;
        Ok(created)
    }

    pub async fn count(&mut self, conditions: &[Condition]) -> Result<usize> {
        let query = self.prepare(conditions)?;
        self.source.count(&query).await
    }

    pub async fn pluck(&mut self, column: &str) -> Result<Vec<Value>> {
        let query = self.prepare(&[])?;
        self.source.pluck(&query, column).await
    }

    pub async fn paginate(&mut self, per_page: Option<usize>, page: usize) -> Result<Page<R>> {
        let per_page = per_page.unwrap_or(self.per_page);
        let query = self.prepare(&[])?;
        self.source.paginate(&query, per_page, page).await
    }

    /// Paginate without counting the full result set
    pub async fn simple_paginate(&mut self, per_page: Option<usize>, page: usize) -> Result<Page<R>> {
        let per_page = per_page.unwrap_or(self.per_page);
        let query = self.prepare(&[])?;
        self.source.simple_paginate(&query, per_page, page).await
    }

    /// Shorthand for `take(limit).all()`
    pub async fn limit(&mut self, limit: usize) -> Result<Vec<R>> {
        self.take(limit);
        self.all().await
    }

    pub async fn find(&mut self, id: Uuid) -> Result<R> {
        let query = self.prepare(&[])?;
        self.source
            .find(&query, id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                resource: R::resource_name().to_string(),
                id: id.to_string(),
            })
    }

    pub async fn find_by_field(&mut self, field: &str, value: Value) -> Result<Vec<R>> {
        self.find_where(&[Condition::eq(field, value)]).await
    }

    pub async fn find_where(&mut self, conditions: &[Condition]) -> Result<Vec<R>> {
        let query = self.prepare(conditions)?;
        self.source.get(&query).await
    }

    pub async fn find_where_in(&mut self, field: &str, values: Vec<Value>) -> Result<Vec<R>> {
        self.find_where(&[Condition::spec(field, "IN", Value::Array(values))])
            .await
    }

    pub async fn find_where_not_in(&mut self, field: &str, values: Vec<Value>) -> Result<Vec<R>> {
        self.find_where(&[Condition::spec(field, "NOT_IN", Value::Array(values))])
            .await
    }

    pub async fn find_where_between(
        &mut self,
        field: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<Vec<R>> {
        let bounds = Value::Array(vec![low.into(), high.into()]);
        self.find_where(&[Condition::spec(field, "BETWEEN", bounds)])
            .await
    }

    /// Fetch through a single criterion, bypassing the chain and the scope
    pub async fn get_by_criteria(&mut self, criterion: &dyn Criterion) -> Result<Vec<R>> {
        let handle = mem::take(&mut self.handle);
        let query = criterion.apply(handle, &self.info())?;
        self.source.get(&query).await
    }

    /// Run an ad hoc operation after criteria and scope
    pub async fn execute(&mut self, operation: Operation) -> Result<Value> {
        let query = self.prepare(&[])?;
        match operation {
            Operation::Exists => Ok(Value::Bool(self.source.exists(&query).await?)),
            Operation::Pluck { column } => {
                Ok(Value::Array(self.source.pluck(&query, &column).await?))
            }
            Operation::Aggregate { function, field } => {
                self.source.aggregate(&query, function, &field).await
            }
        }
    }

    // === Writes ===

    pub async fn create(&mut self, record: R) -> Result<R> {
        self.reset_handle();
        debug!(repository = %self.name, id = %record.id(), "creating record");
        let created = self.source.create(record).await?;
        self.emit(MutationAction::Created, Some(&created)).await;
        Ok(created)
    }

    /// Bulk insert; raises one `created` event without a record
    pub async fn insert(&mut self, records: Vec<R>) -> Result<usize> {
        self.reset_handle();
        let count = self.source.insert(records).await?;
        self.emit(MutationAction::Created, None).await;
        Ok(count)
    }

    pub async fn update(&mut self, id: Uuid, attributes: Value) -> Result<R> {
        let query = self.prepare_scoped(&[])?;
        let current = self
            .source
            .find(&query, id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                resource: R::resource_name().to_string(),
                id: id.to_string(),
            })?;
        self.emit(MutationAction::Updating, Some(&current)).await;

        debug!(repository = %self.name, %id, "updating record");
        let updated = self.source.update(&query, id, attributes).await?;
        self.emit(MutationAction::Updated, Some(&updated)).await;
        Ok(updated)
    }

    /// Update without reading the pre-image or raising `updating`; the
    /// `updated` event is still raised
    pub async fn update_quietly(&mut self, id: Uuid, attributes: Value) -> Result<R> {
        let query = self.prepare_scoped(&[])?;
        let updated = self.source.update(&query, id, attributes).await?;
        self.emit(MutationAction::Updated, Some(&updated)).await;
        Ok(updated)
    }

    /// Update every record matching `conditions`; raises one `updated` event
    /// without a record
    pub async fn update_where(&mut self, conditions: &[Condition], attributes: Value) -> Result<usize> {
        let query = self.prepare_scoped(conditions)?;
        let count = self.source.update_where(&query, attributes).await?;
        self.emit(MutationAction::Updated, None).await;
        Ok(count)
    }

    /// Update the first record matching `attributes` with `values`, or create
    /// one from both
    pub async fn update_or_create(&mut self, attributes: Value, values: Value) -> Result<R> {
        let conditions = self.attribute_conditions(&attributes)?;
        let query = self.prepare_scoped(&conditions)?;

        match self.source.first(&query).await? {
            Some(existing) => {
                self.emit(MutationAction::Updating, Some(&existing)).await;
                let updated = self.source.update(&query, existing.id(), values).await?;
                self.emit(MutationAction::Updated, Some(&updated)).await;
                Ok(updated)
            }
            None => {
                let mut merged = attributes;
                if let (Some(target), Some(extra)) = (merged.as_object_mut(), values.as_object()) {
                    for (key, value) in extra {
                        target.insert(key.clone(), value.clone());
                    }
                }
                let created = self.source.create(R::from_attributes(merged)?).await?;
                self.emit(MutationAction::Created, Some(&created)).await;
                Ok(created)
            }
        }
    }

    pub async fn delete(&mut self, id: Uuid) -> Result<R> {
        self.manage_deletes(id, DeleteMode::Delete).await
    }

    /// Delete every record matching `conditions`; raises one `deleted` event
    /// without a record
    pub async fn delete_where(&mut self, conditions: &[Condition]) -> Result<usize> {
        let query = self.prepare_scoped(conditions)?;
        let count = self.source.delete_where(&query).await?;
        self.emit(MutationAction::Deleted, None).await;
        Ok(count)
    }

    /// Permanently remove a record, trashed or not
    pub async fn force_delete(&mut self, id: Uuid) -> Result<R> {
        self.manage_deletes(id, DeleteMode::Force).await
    }

    /// Bring a trashed record back
    pub async fn restore(&mut self, id: Uuid) -> Result<R> {
        self.manage_deletes(id, DeleteMode::Restore).await
    }

    async fn manage_deletes(&mut self, id: Uuid, mode: DeleteMode) -> Result<R> {
        let query = self.prepare_scoped(&[])?;

        let record = match mode {
            DeleteMode::Delete => self.source.delete(&query, id).await?,
            DeleteMode::Force => {
                self.require_soft_deletes("force_delete")?;
                self.source.force_delete(&query.with_trashed(), id).await?
            }
            DeleteMode::Restore => {
                self.require_soft_deletes("restore")?;
                self.source.restore(&query.with_trashed(), id).await?
            }
        };

        debug!(repository = %self.name, %id, mode = ?mode, "delete operation applied");
        let action = match mode {
            DeleteMode::Restore => MutationAction::Updated,
            DeleteMode::Delete | DeleteMode::Force => MutationAction::Deleted,
        };
        self.emit(action, Some(&record)).await;
        Ok(record)
    }
}

impl<R: Record, S: DataSource<R>> fmt::Debug for Repository<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("criteria", &self.criteria.names())
            .field("handle", &self.handle)
            .field("scoped", &self.scope.is_some())
            .field("skip_criteria", &self.skip_criteria)
            .finish()
    }
}

#[async_trait::async_trait]
impl<R: Record, S: DataSource<R>> ReadRepository<R> for Repository<R, S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn all(&mut self) -> Result<Vec<R>> {
        Repository::all(self).await
    }

    async fn paginate(&mut self, per_page: Option<usize>, page: usize) -> Result<Page<R>> {
        Repository::paginate(self, per_page, page).await
    }

    async fn find(&mut self, id: Uuid) -> Result<R> {
        Repository::find(self, id).await
    }

    async fn find_by_field(&mut self, field: &str, value: Value) -> Result<Vec<R>> {
        Repository::find_by_field(self, field, value).await
    }

    async fn find_where(&mut self, conditions: &[Condition]) -> Result<Vec<R>> {
        Repository::find_where(self, conditions).await
    }
}

#[async_trait::async_trait]
impl<R: Record, S: DataSource<R>> WriteRepository<R> for Repository<R, S> {
    async fn create(&mut self, record: R) -> Result<R> {
        Repository::create(self, record).await
    }

    async fn update(&mut self, id: Uuid, attributes: Value) -> Result<R> {
        Repository::update(self, id, attributes).await
    }

    async fn delete(&mut self, id: Uuid) -> Result<R> {
        Repository::delete(self, id).await
    }

    async fn force_delete(&mut self, id: Uuid) -> Result<R> {
        Repository::force_delete(self, id).await
    }

    async fn restore(&mut self, id: Uuid) -> Result<R> {
        Repository::restore(self, id).await
    }
}
