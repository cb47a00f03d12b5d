//! Read-through caching and group invalidation end to end

mod harness;

use async_trait::async_trait;
use cached_repo::cache::{
    CacheKeyRegistry, CacheStore, CachedRepository, FileRegistryBackend, InMemoryCacheStore,
    InvalidationSubscriber, RequestContext,
};
use cached_repo::config::CacheConfig;
use cached_repo::core::condition::Condition;
use cached_repo::core::criteria::{Criterion, RepositoryInfo};
use cached_repo::core::error::{RepositoryError, Result};
use cached_repo::core::events::EventBus;
use cached_repo::core::query::Query;
use cached_repo::repository::{ReadRepository, Repository, WriteRepository};
use harness::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

const URL: &str = "https://api.test/posts";

struct Published;

impl Criterion for Published {
    fn apply(&self, query: Query, _repository: &RepositoryInfo) -> Result<Query> {
        Ok(query.where_eq("status", "published"))
    }
}

struct ByStatus(&'static str);

impl Criterion for ByStatus {
    fn apply(&self, query: Query, _repository: &RepositoryInfo) -> Result<Query> {
        Ok(query.where_eq("status", self.0))
    }
}

/// Pauses inside the next eviction, after the entry is gone, until resumed
#[derive(Default)]
struct PausingStore {
    inner: InMemoryCacheStore,
    armed: AtomicBool,
    evicted: Notify,
    resume: Notify,
}

impl PausingStore {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for PausingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.inner.put(key, value, ttl).await
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let existed = self.inner.forget(key).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.evicted.notify_one();
            self.resume.notified().await;
        }
        Ok(existed)
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// A store that is always down
struct UnavailableStore;

#[async_trait]
impl CacheStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Err(RepositoryError::Cache("connection refused".into()))
    }

    async fn put(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<()> {
        Err(RepositoryError::Cache("connection refused".into()))
    }

    async fn forget(&self, _key: &str) -> Result<bool> {
        Err(RepositoryError::Cache("connection refused".into()))
    }

    async fn flush(&self) -> Result<()> {
        Err(RepositoryError::Cache("connection refused".into()))
    }
}

#[tokio::test]
async fn test_second_identical_read_is_served_from_cache() {
    let mut fx = cached_posts(URL);

    let first = fx.posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 1);

    let second = fx.posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 1, "cache hit must not reach storage");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_create_invalidates_group() {
    let mut fx = cached_posts(URL);
    fx.posts.all().await.unwrap();
    fx.posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 1);

    fx.posts
        .create(post("Fresh", "draft", 0, "2024-06-01"))
        .await
        .unwrap();
    assert!(fx.store.is_empty().await);
    assert_eq!(fx.registry.get_keys("posts").unwrap().len(), 1);

    let after = fx.posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 2, "write must force a recompute");
    assert_eq!(after.len(), 6);
}

#[tokio::test]
async fn test_update_and_delete_invalidate() {
    let mut fx = cached_posts(URL);
    let before = fx.posts.find_by_field("title", json!("Hello")).await.unwrap();
    let id = before[0].id;

    fx.posts.update(id, json!({"views": 999})).await.unwrap();
    let reread = fx.posts.find(id).await.unwrap();
    assert_eq!(reread.views, 999);

    fx.posts.find(id).await.unwrap();
    let reads = fx.source.reads();
    fx.posts.delete(id).await.unwrap();
    assert!(fx.posts.find(id).await.is_err());
    assert_eq!(fx.source.reads(), reads + 1);
}

#[tokio::test]
async fn test_invalidation_is_limited_to_the_acting_group() {
    let events = EventBus::default();
    let store = Arc::new(InMemoryCacheStore::new());
    let registry = Arc::new(CacheKeyRegistry::in_memory());
    events.subscribe(Arc::new(InvalidationSubscriber::new(
        store.clone(),
        registry.clone(),
    )));

    let post_source = Arc::new(CountingSource::new(sample_posts()));
    let tag_source = Arc::new(CountingSource::new(vec![tag("rust", 1)]));
    let mut posts = CachedRepository::new(
        Repository::<Post, _>::new(post_source.clone(), events.clone()).named("posts"),
        store.clone(),
        registry.clone(),
    );
    let mut tags = CachedRepository::new(
        Repository::<Tag, _>::new(tag_source.clone(), events.clone()).named("tags"),
        store.clone(),
        registry.clone(),
    );

    posts.all().await.unwrap();
    tags.all().await.unwrap();
    tags.create(tag("go", 2)).await.unwrap();

    posts.all().await.unwrap();
    tags.all().await.unwrap();
    assert_eq!(post_source.reads(), 1);
    assert_eq!(tag_source.reads(), 2);
}

#[tokio::test]
async fn test_cache_key_is_deterministic_and_partitioned_by_request() {
    let a = cached_posts("https://api.test/posts?page=1");
    let b = cached_posts("https://api.test/posts?page=2");

    let key = a.posts.cache_key("all", &json!([])).unwrap();
    assert_eq!(key, a.posts.cache_key("all", &json!([])).unwrap());
    assert_eq!(
        key,
        cached_posts("https://api.test/posts?page=1")
            .posts
            .cache_key("all", &json!([]))
            .unwrap()
    );
    assert_ne!(key, b.posts.cache_key("all", &json!([])).unwrap());
    assert!(key.starts_with("posts@all-"));
}

#[tokio::test]
async fn test_same_call_from_two_requests_is_cached_twice() {
    let mut fx = cached_posts("https://api.test/posts?page=1");
    fx.posts.all().await.unwrap();
    fx.posts
        .set_request(RequestContext::new("https://api.test/posts?page=2"));
    fx.posts.all().await.unwrap();

    assert_eq!(fx.source.reads(), 2);
    assert_eq!(fx.registry.get_keys("posts").unwrap().len(), 2);
}

#[tokio::test]
async fn test_pending_modifiers_and_criteria_change_the_key() {
    let mut fx = cached_posts(URL);
    let all = fx.posts.all().await.unwrap();

    fx.posts.inner_mut().take(2);
    let limited = fx.posts.all().await.unwrap();
    assert_eq!(limited.len(), 2);

    fx.posts.inner_mut().push_criterion(Published);
    let published = fx.posts.all().await.unwrap();
    assert_eq!(published.len(), 3);

    assert_eq!(fx.source.reads(), 3);
    assert_eq!(fx.posts.all().await.unwrap(), published);
    assert_eq!(fx.source.reads(), 3);
    assert_ne!(all.len(), published.len());
}

#[tokio::test]
async fn test_scope_and_criterion_parameters_change_the_key() {
    let mut fx = cached_posts(URL);
    fx.posts
        .inner_mut()
        .scope_query(|query| query.where_eq("status", "draft"));
    assert_eq!(fx.posts.all().await.unwrap().len(), 1);

    fx.posts.inner_mut().reset_scope();
    assert_eq!(fx.posts.all().await.unwrap().len(), 5);

    fx.posts.inner_mut().push_criterion(ByStatus("draft"));
    assert_eq!(titles(&fx.posts.all().await.unwrap()), vec!["Draft notes"]);

    fx.posts
        .inner_mut()
        .reset_criteria()
        .push_criterion(ByStatus("archived"));
    assert_eq!(titles(&fx.posts.all().await.unwrap()), vec!["Archive"]);
    assert_eq!(fx.source.reads(), 4);
}

#[tokio::test]
async fn test_every_cacheable_method_hits() {
    let mut fx = cached_posts(URL);
    let id = fx.posts.inner_mut().first().await.unwrap().unwrap().id;

    for _ in 0..2 {
        fx.posts.paginate(Some(2), 1).await.unwrap();
        fx.posts.find(id).await.unwrap();
        fx.posts.find_by_field("status", json!("draft")).await.unwrap();
        fx.posts
            .find_where(&[Condition::spec("views", ">", 50)])
            .await
            .unwrap();
    }

    // one lookup for the id; paginate counts then fetches
    assert_eq!(fx.source.reads(), 6);
    assert_eq!(fx.registry.get_keys("posts").unwrap().len(), 4);
}

#[tokio::test]
async fn test_skip_cache_flag_and_request_param() {
    let mut fx = cached_posts(URL);
    fx.posts.skip_cache(true);
    fx.posts.all().await.unwrap();
    fx.posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 2);
    assert!(fx.registry.get_keys("posts").unwrap().is_empty());

    let mut fx = cached_posts("https://api.test/posts?skipCache=true");
    fx.posts.all().await.unwrap();
    fx.posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 2);
}

#[tokio::test]
async fn test_disabled_and_excluded_methods_bypass() {
    let mut config = CacheConfig::default();
    config.enabled = false;
    let fx = cached_posts(URL);
    let mut posts = fx.posts.with_config(&config);
    posts.all().await.unwrap();
    posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 2);

    let mut fx = cached_posts(URL);
    fx.posts.cache_except(["all"]);
    fx.posts.all().await.unwrap();
    fx.posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 2);

    fx.posts.cache_only(["all"]);
    fx.posts.all().await.unwrap();
    fx.posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 3);
}

#[tokio::test]
async fn test_expired_entries_are_recomputed() {
    let mut fx = cached_posts(URL);
    fx.posts.cache_minutes(0);
    fx.posts.all().await.unwrap();
    fx.posts.all().await.unwrap();
    assert_eq!(fx.source.reads(), 2);
}

#[tokio::test]
async fn test_clean_config_can_keep_cache_on_create() {
    let mut config = CacheConfig::default();
    config.clean.on.created = false;

    let events = EventBus::default();
    let store = Arc::new(InMemoryCacheStore::new());
    let registry = Arc::new(CacheKeyRegistry::in_memory());
    events.subscribe(Arc::new(InvalidationSubscriber::from_config(
        store.clone(),
        registry.clone(),
        &config,
    )));
    let source = Arc::new(CountingSource::new(sample_posts()));
    let mut posts = CachedRepository::new(
        Repository::<Post, _>::new(source.clone(), events).named("posts"),
        store,
        registry,
    )
    .with_config(&config);

    posts.all().await.unwrap();
    posts.create(post("Unseen", "draft", 0, "2024-06-01")).await.unwrap();
    let stale = posts.all().await.unwrap();
    assert_eq!(stale.len(), 5);
    assert_eq!(source.reads(), 1);
}

#[tokio::test]
async fn test_unavailable_store_falls_back_to_storage() {
    let source = Arc::new(CountingSource::new(sample_posts()));
    let mut posts = CachedRepository::new(
        Repository::<Post, _>::new(source.clone(), EventBus::default()).named("posts"),
        Arc::new(UnavailableStore),
        Arc::new(CacheKeyRegistry::in_memory()),
    );

    assert_eq!(posts.all().await.unwrap().len(), 5);
    assert_eq!(posts.all().await.unwrap().len(), 5);
    assert_eq!(source.reads(), 2);
}

#[tokio::test]
async fn test_failed_flush_does_not_fail_the_write() {
    let events = EventBus::default();
    let registry = Arc::new(CacheKeyRegistry::in_memory());
    events.subscribe(Arc::new(InvalidationSubscriber::new(
        Arc::new(UnavailableStore),
        registry.clone(),
    )));
    registry.put_key("posts", "posts@all-stale").unwrap();

    let source = Arc::new(CountingSource::new(sample_posts()));
    let mut posts = Repository::<Post, _>::new(source, events).named("posts");
    posts
        .create(post("Written", "draft", 0, "2024-06-01"))
        .await
        .unwrap();

    assert_eq!(
        registry.get_keys("posts").unwrap(),
        vec!["posts@all-stale".to_string()]
    );
}

#[tokio::test]
async fn test_file_registry_shared_between_processes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repository-cache-keys.json");
    let store = Arc::new(InMemoryCacheStore::new());

    let writer = Arc::new(CacheKeyRegistry::open(FileRegistryBackend::new(&path)).unwrap());
    let events = EventBus::default();
    let source = Arc::new(CountingSource::new(sample_posts()));
    let mut posts = CachedRepository::new(
        Repository::<Post, _>::new(source.clone(), events.clone()).named("posts"),
        store.clone(),
        writer.clone(),
    );
    posts.all().await.unwrap();
    writer.flush().unwrap();

    let reader = Arc::new(CacheKeyRegistry::open(FileRegistryBackend::new(&path)).unwrap());
    assert_eq!(reader.get_keys("posts").unwrap().len(), 1);

    let subscriber = InvalidationSubscriber::new(store.clone(), reader.clone());
    assert_eq!(subscriber.flush_group("posts").await.unwrap(), 1);
    assert!(store.is_empty().await);

    posts.all().await.unwrap();
    assert_eq!(source.reads(), 2);
}

#[tokio::test]
async fn test_read_during_flush_is_invalidated_by_the_next_write() {
    let events = EventBus::default();
    let store = Arc::new(PausingStore::default());
    let registry = Arc::new(CacheKeyRegistry::in_memory());
    events.subscribe(Arc::new(InvalidationSubscriber::new(
        store.clone(),
        registry.clone(),
    )));

    let source = Arc::new(CountingSource::new(sample_posts()));
    let repository = || Repository::<Post, _>::new(source.clone(), events.clone()).named("posts");
    let mut reader = CachedRepository::new(repository(), store.clone(), registry.clone())
        .with_request(RequestContext::new(URL));
    let mut writer = CachedRepository::new(repository(), store.clone(), registry.clone())
        .with_request(RequestContext::new(URL));

    assert_eq!(reader.all().await.unwrap().len(), 5);

    store.arm();
    let flushing = tokio::spawn(async move {
        writer
            .create(post("Second", "draft", 0, "2024-06-01"))
            .await
            .unwrap();
        writer
    });

    // the reader stores the key again while the flush is paused
    store.evicted.notified().await;
    assert_eq!(reader.all().await.unwrap().len(), 6);
    store.resume.notify_one();
    let mut writer = flushing.await.unwrap();

    writer
        .create(post("Third", "draft", 0, "2024-06-02"))
        .await
        .unwrap();
    assert_eq!(reader.all().await.unwrap().len(), 7);
    assert_eq!(source.reads(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_reads_compute_once() {
    let store = Arc::new(InMemoryCacheStore::new());
    let registry = Arc::new(CacheKeyRegistry::in_memory());
    let source = Arc::new(
        CountingSource::new(sample_posts()).with_read_delay(Duration::from_millis(20)),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let mut posts = CachedRepository::new(
            Repository::<Post, _>::new(source.clone(), EventBus::default()).named("posts"),
            store.clone(),
            registry.clone(),
        )
        .with_request(RequestContext::new(URL));
        handles.push(tokio::spawn(async move { posts.all().await.unwrap().len() }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 5);
    }

    assert_eq!(source.reads(), 1);
    assert!(registry.locks().is_empty());
}
