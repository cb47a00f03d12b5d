//! Reusable query transformations and the ordered chain that applies them
//!
//! A [`Criterion`] receives the current handle plus a description of the
//! repository and returns the next handle. The chain folds its criteria in
//! insertion order, so every criterion observes the cumulative effect of the
//! ones pushed before it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::core::error::{RepositoryError, Result};
use crate::core::query::Query;

/// What a criterion may know about the repository it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    /// Repository name (also its cache group)
    pub name: String,
    /// Resource name of the record type
    pub resource: &'static str,
    /// Whether the record type supports soft deletes
    pub soft_deletes: bool,
}

/// A named, stateless query transformation
///
/// ```rust,ignore
/// struct Published;
///
/// impl Criterion for Published {
///     fn apply(&self, query: Query, _repository: &RepositoryInfo) -> Result<Query> {
///         Ok(query.where_eq("status", "published"))
///     }
/// }
/// ```
pub trait Criterion: Any + Send + Sync {
    fn apply(&self, query: Query, repository: &RepositoryInfo) -> Result<Query>;

    /// Display name, defaulting to the Rust type name
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl fmt::Debug for dyn Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Criterion({})", self.name())
    }
}

/// Concrete type of a boxed criterion
fn identity(criterion: &dyn Criterion) -> TypeId {
    let any: &dyn Any = criterion;
    any.type_id()
}

/// Ordered collection of criteria held by a repository
#[derive(Debug, Default)]
pub struct CriteriaChain {
    items: Vec<Box<dyn Criterion>>,
}

impl CriteriaChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, criterion: Box<dyn Criterion>) {
        self.items.push(criterion);
    }

    /// Remove every entry of concrete type `C`
    pub fn remove_type<C: Criterion>(&mut self) -> usize {
        self.remove_by_identity(TypeId::of::<C>())
    }

    /// Remove every entry of the same concrete type as `criterion`
    pub fn remove_like(&mut self, criterion: &dyn Criterion) -> usize {
        self.remove_by_identity(identity(criterion))
    }

    /// Remove every entry whose `name()` equals `name`
    pub fn remove_named(&mut self, name: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.name() != name);
        before - self.items.len()
    }

    fn remove_by_identity(&mut self, id: TypeId) -> usize {
        let before = self.items.len();
        self.items.retain(|item| identity(item.as_ref()) != id);
        before - self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Criterion> {
        self.items.iter().map(|item| item.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|criterion| criterion.name()).collect()
    }

    /// Fold the chain over `query` in insertion order
    pub fn apply(&self, query: Query, repository: &RepositoryInfo) -> Result<Query> {
        self.items.iter().try_fold(query, |query, criterion| {
            trace!(
                criterion = criterion.name(),
                repository = %repository.name,
                "applying criterion"
            );
            criterion.apply(query, repository)
        })
    }
}

type Factory = Arc<dyn Fn() -> Box<dyn Criterion> + Send + Sync>;

/// Alias → factory table used by `push_criterion_named`
#[derive(Clone)]
pub struct CriteriaRegistry {
    factories: HashMap<String, Factory>,
}

impl CriteriaRegistry {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with `with_trashed` and `only_trashed` pre-registered
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register::<WithTrashed>("with_trashed");
        registry.register::<OnlyTrashed>("only_trashed");
        registry
    }

    /// Register a default-constructible criterion under `alias`
    pub fn register<C: Criterion + Default>(&mut self, alias: impl Into<String>) -> &mut Self {
        self.register_with(alias, || Box::new(C::default()))
    }

    pub fn register_with(
        &mut self,
        alias: impl Into<String>,
        factory: impl Fn() -> Box<dyn Criterion> + Send + Sync + 'static,
    ) -> &mut Self {
        self.factories.insert(alias.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.factories.contains_key(alias)
    }

    /// Instantiate the criterion registered under `alias`
    pub fn make(&self, alias: &str) -> Result<Box<dyn Criterion>> {
        self.factories
            .get(alias)
            .map(|factory| factory())
            .ok_or_else(|| {
                RepositoryError::configuration(format!(
                    "'{}' is not a registered criterion",
                    alias
                ))
            })
    }
}

impl Default for CriteriaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CriteriaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut aliases: Vec<_> = self.factories.keys().collect();
        aliases.sort();
        f.debug_struct("CriteriaRegistry")
            .field("aliases", &aliases)
            .finish()
    }
}

/// Include soft-deleted records
#[derive(Debug, Default, Clone, Copy)]
pub struct WithTrashed;

impl Criterion for WithTrashed {
    fn apply(&self, query: Query, repository: &RepositoryInfo) -> Result<Query> {
        if !repository.soft_deletes {
            return Err(RepositoryError::capability_missing(
                repository.resource,
                "with_trashed",
            ));
        }
        Ok(query.with_trashed())
    }

    fn name(&self) -> &'static str {
        "with_trashed"
    }
}

/// Return soft-deleted records only
#[derive(Debug, Default, Clone, Copy)]
pub struct OnlyTrashed;

impl Criterion for OnlyTrashed {
    fn apply(&self, query: Query, repository: &RepositoryInfo) -> Result<Query> {
        if !repository.soft_deletes {
            return Err(RepositoryError::capability_missing(
                repository.resource,
                "only_trashed",
            ));
        }
        Ok(query.only_trashed())
    }

    fn name(&self) -> &'static str {
        "only_trashed"
    }
}
