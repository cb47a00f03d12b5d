//! Group-wide cache flushing on repository mutations

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use crate::cache::registry::CacheKeyRegistry;
use crate::cache::store::CacheStore;
use crate::config::{CacheConfig, CleanConfig};
use crate::core::error::Result;
use crate::core::events::{MutationAction, MutationListener, MutationEvent};

/// Evicts every cached read of a repository when it mutates
///
/// Subscribe it to the [`EventBus`](crate::core::events::EventBus) shared
/// by the repositories whose caches it should keep fresh. Failures are
/// logged and never reach the mutation that raised the event.
pub struct InvalidationSubscriber {
    store: Arc<dyn CacheStore>,
    registry: Arc<CacheKeyRegistry>,
    clean: CleanConfig,
}

impl InvalidationSubscriber {
    pub fn new(store: Arc<dyn CacheStore>, registry: Arc<CacheKeyRegistry>) -> Self {
        Self {
            store,
            registry,
            clean: CleanConfig::default(),
        }
    }

    pub fn from_config(
        store: Arc<dyn CacheStore>,
        registry: Arc<CacheKeyRegistry>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clean: config.clean.clone(),
        }
    }

    pub fn clean(&self) -> &CleanConfig {
        &self.clean
    }

    /// Forget every key registered under `group`
    ///
    /// Returns how many keys were evicted. Keys stay registered: a reader
    /// may store the same key again while the flush runs, and only a
    /// registered key is evicted by the next mutation.
    pub async fn flush_group(&self, group: &str) -> Result<usize> {
        let keys = self.registry.get_keys(group)?;
        let mut flushed = 0;

        for key in keys {
            match self.store.forget(&key).await {
                Ok(_) => flushed += 1,
                Err(err) => error!(group, key = %key, error = %err, "failed to evict cache key"),
            }
        }

        Ok(flushed)
    }
}

impl std::fmt::Debug for InvalidationSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationSubscriber")
            .field("registry", &self.registry)
            .field("clean", &self.clean)
            .finish()
    }
}

#[async_trait]
impl MutationListener for InvalidationSubscriber {
    fn handles(&self, action: MutationAction) -> bool {
        self.clean.flushes_on(action)
    }

    async fn handle(&self, event: &MutationEvent) {
        match self.flush_group(&event.repository).await {
            Ok(flushed) => debug!(
                repository = %event.repository,
                action = %event.action,
                flushed,
                "cache group flushed"
            ),
            Err(err) => error!(
                repository = %event.repository,
                action = %event.action,
                error = %err,
                "cache group flush failed"
            ),
        }
    }
}
