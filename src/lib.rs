//! # cached-repo
//!
//! A repository data-access layer with a composable criteria pipeline,
//! declarative conditions and a read-through cache that is flushed
//! group-wide whenever the repository mutates.
//!
//! ## Features
//!
//! - **Criteria Pipeline**: reusable query transformations applied in insertion order
//! - **Declarative Conditions**: `[field, kind, value]` triples compiled into filters
//! - **Soft Deletes**: `force_delete`, `restore` and trashed visibility criteria
//! - **Read-Through Cache**: deterministic keys partitioned by request URL
//! - **Group Invalidation**: mutation events flush every key of the acting repository
//! - **Configuration-Based**: pagination and cache behaviour loaded from YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cached_repo::prelude::*;
//!
//! let events = EventBus::default();
//! let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
//! let registry = Arc::new(CacheKeyRegistry::in_memory());
//! events.subscribe(Arc::new(InvalidationSubscriber::new(store.clone(), registry.clone())));
//!
//! let source = Arc::new(InMemoryDataSource::<Post>::new());
//! let repository = Repository::new(source, events).named("posts");
//! let mut posts = CachedRepository::new(repository, store, registry)
//!     .with_request(RequestContext::new("https://api.test/posts"));
//!
//! let published = posts
//!     .find_where(&[Condition::spec("status", "IN", json!(["published", "pinned"]))])
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod repository;
pub mod storage;

/// Re-exports of the most commonly used types
pub mod prelude {
    pub use crate::cache::{
        CacheKeyRegistry, CacheSettings, CacheStore, CachedRepository, FileRegistryBackend,
        InMemoryCacheStore, InMemoryRegistryBackend, InvalidationSubscriber, RegistryBackend,
        RequestContext,
    };
    pub use crate::config::{CacheConfig, PaginationConfig, RepositoryConfig};
    pub use crate::core::{
        Aggregate, Comparison, Condition, ConditionCompiler, ConditionKind, ConditionValue,
        CriteriaChain, CriteriaRegistry, Criterion, DataSource, Direction, EventBus,
        MutationAction, MutationEvent, MutationListener, OnlyTrashed, Operation, Page,
        PaginationMeta, Predicate, Query, Record, RepositoryError, RepositoryInfo, Result,
        WithTrashed,
    };
    pub use crate::repository::{ReadRepository, Repository, WriteRepository};
    pub use crate::storage::InMemoryDataSource;

    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
    pub use uuid::Uuid;
}
