//! Read-through caching decorator around a repository

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::registry::CacheKeyRegistry;
use crate::cache::request::RequestContext;
use crate::cache::store::CacheStore;
use crate::config::{AllowedMethods, CacheConfig};
use crate::core::condition::Condition;
use crate::core::error::{RepositoryError, Result};
use crate::core::query::Page;
use crate::core::record::Record;
use crate::core::service::DataSource;
use crate::repository::{ReadRepository, Repository, WriteRepository};

/// Cache behaviour of one decorator
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Time to live in minutes
    pub minutes: u64,
    pub allowed: AllowedMethods,
    /// Request parameter that bypasses the cache when truthy
    pub skip_param: String,
}

impl CacheSettings {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            minutes: config.minutes,
            allowed: config.allowed.clone(),
            skip_param: config.params.skip_cache.clone(),
        }
    }

    pub fn allows(&self, method: &str) -> bool {
        self.allowed.allows(method)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.minutes.saturating_mul(60))
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// A [`Repository`] whose read operations go through a cache store
///
/// Every cached result is registered in the [`CacheKeyRegistry`] under the
/// repository name, so an [`InvalidationSubscriber`](crate::cache::InvalidationSubscriber)
/// can flush the whole group when the repository mutates. Writes are
/// forwarded untouched; criteria and handle modifiers are managed through
/// [`CachedRepository::inner_mut`].
///
/// ```rust,ignore
/// let mut posts = CachedRepository::new(repository, store, registry)
///     .with_request(RequestContext::new("https://api.test/posts?page=1"));
///
/// let first = posts.all().await?;  // miss, loads from the data source
/// let again = posts.all().await?;  // hit
/// ```
pub struct CachedRepository<R: Record, S: DataSource<R>> {
    inner: Repository<R, S>,
    store: Arc<dyn CacheStore>,
    registry: Arc<CacheKeyRegistry>,
    settings: CacheSettings,
    request: RequestContext,
    skip: bool,
}

impl<R: Record, S: DataSource<R>> CachedRepository<R, S> {
    pub fn new(
        inner: Repository<R, S>,
        store: Arc<dyn CacheStore>,
        registry: Arc<CacheKeyRegistry>,
    ) -> Self {
        Self {
            inner,
            store,
            registry,
            settings: CacheSettings::default(),
            request: RequestContext::default(),
            skip: false,
        }
    }

    pub fn with_config(mut self, config: &CacheConfig) -> Self {
        self.settings = CacheSettings::from_config(config);
        self
    }

    pub fn with_settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The request the following calls are made for
    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    pub fn set_request(&mut self, request: RequestContext) -> &mut Self {
        self.request = request;
        self
    }

    pub fn cache_minutes(&mut self, minutes: u64) -> &mut Self {
        self.settings.minutes = minutes;
        self
    }

    /// Cache only the named methods
    pub fn cache_only<I, M>(&mut self, methods: I) -> &mut Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.settings.allowed.only = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Cache every method except the named ones
    pub fn cache_except<I, M>(&mut self, methods: I) -> &mut Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.settings.allowed.except = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Bypass the cache until called again with `false`
    pub fn skip_cache(&mut self, skip: bool) -> &mut Self {
        self.skip = skip;
        self
    }

    /// Skipped explicitly or by a truthy skip parameter on the request
    pub fn is_skipped(&self) -> bool {
        self.skip || self.request.is_truthy(&self.settings.skip_param)
    }

    pub fn allowed(&self, method: &str) -> bool {
        self.settings.enabled && self.settings.allows(method)
    }

    pub fn ttl(&self) -> Duration {
        self.settings.ttl()
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Cache key of `method` called with `args` in the current state
    ///
    /// The hash covers the arguments, the handle as prepared by criteria and
    /// scope, and the request URL. Fails when a criterion fails.
    pub fn cache_key(&self, method: &str, args: &Value) -> Result<String> {
        let state = json!({
            "args": args,
            "query": self.inner.prepared_query()?,
        });
        let mut hasher = Sha256::new();
        hasher.update(state.to_string().as_bytes());
        hasher.update(self.request.url().as_bytes());
        Ok(format!(
            "{}@{}-{}",
            self.inner.name(),
            method,
            hex::encode(hasher.finalize())
        ))
    }

    pub fn inner(&self) -> &Repository<R, S> {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Repository<R, S> {
        &mut self.inner
    }

    pub fn into_inner(self) -> Repository<R, S> {
        self.inner
    }

    /// Serve `method` from the cache, or run `load` and cache its result
    async fn remember<T, F>(&mut self, method: &str, args: Value, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: for<'r> FnOnce(&'r mut Repository<R, S>) -> BoxFuture<'r, Result<T>> + Send,
    {
        if !self.allowed(method) || self.is_skipped() {
            debug!(repository = %self.inner.name(), method, "cache bypassed");
            return load(&mut self.inner).await;
        }

        let key = match self.cache_key(method, &args) {
            Ok(key) => key,
            Err(err) => {
                self.inner.reset_handle();
                return Err(err);
            }
        };
        let registered = register(
            self.registry.clone(),
            self.inner.name().to_string(),
            key.clone(),
        )
        .await;
        if let Err(err) = registered {
            warn!(key = %key, error = %err, "cache key registration failed, reading uncached");
            return load(&mut self.inner).await;
        }

        let locks = self.registry.locks();
        let guard = locks.acquire(&key).await;
        let result = self.read_through(&key, load).await;
        drop(guard);
        locks.prune(&key);
        result
    }

    async fn read_through<T, F>(&mut self, key: &str, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: for<'r> FnOnce(&'r mut Repository<R, S>) -> BoxFuture<'r, Result<T>> + Send,
    {
        let mut store_result = true;
        match self.store.get(key).await {
            Ok(Some(cached)) => match serde_json::from_value::<T>(cached) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    self.inner.reset_handle();
                    return Ok(value);
                }
                Err(err) => warn!(key, error = %err, "discarding unreadable cache entry"),
            },
            Ok(None) => debug!(key, "cache miss"),
            Err(err) => {
                warn!(key, error = %err, "cache store unavailable, reading uncached");
                store_result = false;
            }
        }

        let value = load(&mut self.inner).await?;
        if store_result {
            match serde_json::to_value(&value) {
                Ok(encoded) => {
                    if let Err(err) = self.store.put(key, encoded, self.ttl()).await {
                        warn!(key, error = %err, "failed to store cache entry");
                    }
                }
                Err(err) => warn!(key, error = %err, "result not cacheable"),
            }
        }
        Ok(value)
    }
}

/// Record `key` under `group` off the async workers, since file-backed
/// registries lock and rewrite a file
async fn register(registry: Arc<CacheKeyRegistry>, group: String, key: String) -> Result<()> {
    tokio::task::spawn_blocking(move || registry.put_key(&group, &key))
        .await
        .map_err(|e| RepositoryError::Registry(format!("registration task failed: {}", e)))?
}

impl<R: Record, S: DataSource<R>> std::fmt::Debug for CachedRepository<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRepository")
            .field("inner", &self.inner)
            .field("settings", &self.settings)
            .field("request", &self.request.url())
            .field("skip", &self.skip)
            .finish()
    }
}

#[async_trait]
impl<R: Record, S: DataSource<R>> ReadRepository<R> for CachedRepository<R, S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn all(&mut self) -> Result<Vec<R>> {
        self.remember("all", json!([]), |repo| Box::pin(repo.all()))
            .await
    }

    async fn paginate(&mut self, per_page: Option<usize>, page: usize) -> Result<Page<R>> {
        self.remember("paginate", json!([per_page, page]), move |repo| {
            Box::pin(repo.paginate(per_page, page))
        })
        .await
    }

    async fn find(&mut self, id: Uuid) -> Result<R> {
        self.remember("find", json!([id]), move |repo| Box::pin(repo.find(id)))
            .await
    }

    async fn find_by_field(&mut self, field: &str, value: Value) -> Result<Vec<R>> {
        let args = json!([field, value]);
        let field = field.to_string();
        self.remember("find_by_field", args, move |repo| {
            Box::pin(async move { repo.find_by_field(&field, value).await })
        })
        .await
    }

    async fn find_where(&mut self, conditions: &[Condition]) -> Result<Vec<R>> {
        let args = serde_json::to_value(conditions)?;
        let conditions = conditions.to_vec();
        self.remember("find_where", args, move |repo| {
            Box::pin(async move { repo.find_where(&conditions).await })
        })
        .await
    }
}

#[async_trait]
impl<R: Record, S: DataSource<R>> WriteRepository<R> for CachedRepository<R, S> {
    async fn create(&mut self, record: R) -> Result<R> {
        self.inner.create(record).await
    }

    async fn update(&mut self, id: Uuid, attributes: Value) -> Result<R> {
        self.inner.update(id, attributes).await
    }

    async fn delete(&mut self, id: Uuid) -> Result<R> {
        self.inner.delete(id).await
    }

    async fn force_delete(&mut self, id: Uuid) -> Result<R> {
        self.inner.force_delete(id).await
    }

    async fn restore(&mut self, id: Uuid) -> Result<R> {
        self.inner.restore(id).await
    }
}
