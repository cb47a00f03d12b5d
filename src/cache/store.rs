//! Cache store abstraction and an in-memory, TTL-aware implementation

use async_trait::async_trait;
use futures::future::BoxFuture;
use moka::Expiry;
use moka::future::Cache;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::core::error::Result;

/// Key/value store holding cached read results as JSON
///
/// The store offers no key enumeration; the cache key registry tracks which
/// keys belong to which repository.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a live entry
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key` for `ttl`
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Remove an entry, returning whether one existed
    async fn forget(&self, key: &str) -> Result<bool>;

    /// Remove every entry
    async fn flush(&self) -> Result<()>;

    /// Get `key`, or await `compute`, store its value for `ttl` and return it
    ///
    /// Store errors propagate. [`CachedRepository`](crate::cache::CachedRepository)
    /// talks to `get` and `put` directly instead, so that an unavailable
    /// store degrades to an uncached read.
    async fn remember<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        compute: BoxFuture<'a, Result<Value>>,
    ) -> Result<Value> {
        if let Some(cached) = self.get(key).await? {
            return Ok(cached);
        }
        let value = compute.await?;
        self.put(key, value.clone(), ttl).await?;
        Ok(value)
    }
}

const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    ttl: Duration,
}

/// Expires each entry after the ttl it was stored with
struct EntryTtl;

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-memory cache store backed by `moka`
///
/// Each entry expires after its own ttl; the least recently used entries
/// are evicted once `capacity` is reached.
#[derive(Clone)]
pub struct InMemoryCacheStore {
    entries: Cache<String, CacheEntry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .expire_after(EntryTtl)
                .build(),
        }
    }

    /// Number of live entries
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCacheStore")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), CacheEntry { value, ttl })
            .await;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).await.is_some())
    }

    async fn flush(&self) -> Result<()> {
        self.entries.invalidate_all();
        Ok(())
    }
}
