//! Shared test harness for repository and cache testing
//!
//! Provides `Post` (a soft-deleting record with nested comments), `Tag` (a
//! plain record), a call-counting `CountingSource` wrapper, an
//! `EventRecorder` listener and helpers building wired-up repositories.
//!
//! # Usage
//!
//! From any integration test file in `tests/`:
//! ```rust,ignore
//! #[macro_use]
//! mod harness;
//! use harness::*;
//! ```

#![allow(dead_code)]

#[macro_use]
pub mod data_source_tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use cached_repo::cache::{CacheKeyRegistry, CachedRepository, InMemoryCacheStore, InvalidationSubscriber};
use cached_repo::cache::{CacheStore, RequestContext};
use cached_repo::core::error::Result;
use cached_repo::core::events::{EventBus, MutationAction, MutationEvent, MutationListener};
use cached_repo::core::query::{Page, Query};
use cached_repo::core::record::Record;
use cached_repo::core::service::DataSource;
use cached_repo::repository::Repository;
use cached_repo::storage::InMemoryDataSource;

// ---------------------------------------------------------------------------
// Post: soft-deleting record with nested relations
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub body: String,
    pub approved: bool,
}

/// A blog post. Fields:
/// - `status`: string filters and IN lists
/// - `views`: numeric comparisons and aggregates
/// - `published_at`: date-part conditions (`YYYY-MM-DD`)
/// - `comments`: relation conditions (HAS / DOES_NOT_HAVE)
/// - `deleted_at`: soft deletes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record for Post {
    const SOFT_DELETES: bool = true;

    fn resource_name() -> &'static str {
        "post"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>) {
        self.deleted_at = at;
    }
}

/// Create a post without comments
pub fn post(title: &str, status: &str, views: i64, published_at: &str) -> Post {
    Post {
        id: Uuid::new_v4(),
        title: title.to_string(),
        status: status.to_string(),
        views,
        published_at: published_at.to_string(),
        comments: Vec::new(),
        deleted_at: None,
    }
}

pub fn comment(body: &str, approved: bool) -> Comment {
    Comment {
        body: body.to_string(),
        approved,
    }
}

/// Five posts covering every status, a range of views and dates, and
/// posts with and without (approved) comments
pub fn sample_posts() -> Vec<Post> {
    let mut hello = post("Hello", "published", 120, "2024-01-15");
    hello.comments = vec![comment("nice", true), comment("spam", false)];

    let mut draft = post("Draft notes", "draft", 0, "2024-02-01");
    draft.comments = vec![comment("pending", false)];

    vec![
        hello,
        draft,
        post("Release", "published", 80, "2024-02-20"),
        post("Archive", "archived", 15, "2023-12-31"),
        post("Roadmap", "published", 300, "2024-03-05"),
    ]
}

// ---------------------------------------------------------------------------
// Tag: record without soft deletes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub weight: i64,
}

impl Record for Tag {
    fn resource_name() -> &'static str {
        "tag"
    }

    fn id(&self) -> Uuid {
        self.id
    }
}

pub fn tag(name: &str, weight: i64) -> Tag {
    Tag {
        id: Uuid::new_v4(),
        name: name.to_string(),
        weight,
    }
}

// ---------------------------------------------------------------------------
// CountingSource: observes how often the repository reaches storage
// ---------------------------------------------------------------------------

/// Delegates to an `InMemoryDataSource`, counting reads (`get`, `count`)
/// and mutations separately.
pub struct CountingSource<R: Record> {
    inner: InMemoryDataSource<R>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    read_delay: Option<Duration>,
}

impl<R: Record> CountingSource<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            inner: InMemoryDataSource::with_records(records),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            read_delay: None,
        }
    }

    /// Sleep before every `get`, so concurrent readers overlap
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.reads() + self.writes()
    }

    pub fn storage(&self) -> &InMemoryDataSource<R> {
        &self.inner
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<R: Record> DataSource<R> for CountingSource<R> {
    async fn get(&self, query: &Query) -> Result<Vec<R>> {
        self.read();
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get(query).await
    }

    async fn count(&self, query: &Query) -> Result<usize> {
        self.read();
        self.inner.count(query).await
    }

    async fn create(&self, record: R) -> Result<R> {
        self.wrote();
        self.inner.create(record).await
    }

    async fn insert(&self, records: Vec<R>) -> Result<usize> {
        self.wrote();
        self.inner.insert(records).await
    }

    async fn update(&self, query: &Query, id: Uuid, attributes: Value) -> Result<R> {
        self.wrote();
        self.inner.update(query, id, attributes).await
    }

    async fn update_where(&self, query: &Query, attributes: Value) -> Result<usize> {
        self.wrote();
        self.inner.update_where(query, attributes).await
    }

    async fn delete(&self, query: &Query, id: Uuid) -> Result<R> {
        self.wrote();
        self.inner.delete(query, id).await
    }

    async fn delete_where(&self, query: &Query) -> Result<usize> {
        self.wrote();
        self.inner.delete_where(query).await
    }

    async fn force_delete(&self, query: &Query, id: Uuid) -> Result<R> {
        self.wrote();
        self.inner.force_delete(query, id).await
    }

    async fn restore(&self, query: &Query, id: Uuid) -> Result<R> {
        self.wrote();
        self.inner.restore(query, id).await
    }
}

// ---------------------------------------------------------------------------
// EventRecorder: captures published mutation events
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<MutationEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<MutationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<MutationAction> {
        self.events().iter().map(|event| event.action).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl MutationListener for EventRecorder {
    async fn handle(&self, event: &MutationEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A post repository over a counting source seeded with `sample_posts()`
pub fn post_repository() -> (Repository<Post, CountingSource<Post>>, Arc<CountingSource<Post>>) {
    let source = Arc::new(CountingSource::new(sample_posts()));
    let repository = Repository::new(source.clone(), EventBus::default()).named("posts");
    (repository, source)
}

/// Everything a cached repository test needs to observe
pub struct CachedFixture {
    pub posts: CachedRepository<Post, CountingSource<Post>>,
    pub source: Arc<CountingSource<Post>>,
    pub store: Arc<InMemoryCacheStore>,
    pub registry: Arc<CacheKeyRegistry>,
    pub events: EventBus,
}

/// A cached post repository whose event bus carries an invalidation subscriber
pub fn cached_posts(url: &str) -> CachedFixture {
    let events = EventBus::default();
    let store = Arc::new(InMemoryCacheStore::new());
    let registry = Arc::new(CacheKeyRegistry::in_memory());
    events.subscribe(Arc::new(InvalidationSubscriber::new(
        store.clone(),
        registry.clone(),
    )));

    let source = Arc::new(CountingSource::new(sample_posts()));
    let repository = Repository::new(source.clone(), events.clone()).named("posts");
    let dyn_store: Arc<dyn CacheStore> = store.clone();
    let posts = CachedRepository::new(repository, dyn_store, registry.clone())
        .with_request(RequestContext::new(url));

    CachedFixture {
        posts,
        source,
        store,
        registry,
        events,
    }
}

pub fn titles(posts: &[Post]) -> Vec<&str> {
    posts.iter().map(|post| post.title.as_str()).collect()
}

pub fn page_titles(page: &Page<Post>) -> Vec<&str> {
    titles(&page.data)
}
