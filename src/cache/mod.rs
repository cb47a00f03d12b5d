//! Caching layer: stores, the key registry, the decorator and invalidation

pub mod decorator;
pub mod invalidation;
pub mod locks;
pub mod registry;
pub mod request;
pub mod store;

pub use decorator::{CacheSettings, CachedRepository};
pub use invalidation::InvalidationSubscriber;
pub use locks::KeyedLocks;
pub use registry::{
    CacheKeyRegistry, FileRegistryBackend, InMemoryRegistryBackend, KeyMap, RegistryBackend,
};
pub use request::RequestContext;
pub use store::{CacheStore, InMemoryCacheStore};
