//! Cached listing example
//!
//! This example demonstrates:
//! - A repository over the in-memory data source
//! - Criteria, scopes and declarative conditions
//! - Read-through caching keyed by request URL
//! - Group invalidation when the repository mutates
//! - A file-backed cache key registry
//!
//! Run with `RUST_LOG=cached_repo=debug` to watch hits, misses and flushes.

use anyhow::Result;
use cached_repo::prelude::*;
use chrono::{DateTime, Utc};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Article {
    id: Uuid,
    title: String,
    status: String,
    views: i64,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
}

impl Record for Article {
    const SOFT_DELETES: bool = true;

    fn resource_name() -> &'static str {
        "article"
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

fn article(title: &str, status: &str, views: i64) -> Article {
    Article {
        id: Uuid::new_v4(),
        title: title.to_string(),
        status: status.to_string(),
        views,
        deleted_at: None,
    }
}

/// Only published articles
struct Published;

impl Criterion for Published {
    fn apply(&self, query: Query, _repository: &RepositoryInfo) -> cached_repo::core::Result<Query> {
        Ok(query.where_eq("status", "published"))
    }

    fn name(&self) -> &'static str {
        "published"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("🚀 cached-repo listing example");
    println!("==============================\n");

    let workdir = tempfile::tempdir()?;
    let mut config = RepositoryConfig::default();
    config.cache.registry_path = Some(workdir.path().join("repository-cache-keys.json"));

    // Shared infrastructure
    let events = EventBus::default();
    let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
    let registry = Arc::new(CacheKeyRegistry::from_config(&config.cache)?);
    events.subscribe(Arc::new(InvalidationSubscriber::from_config(
        store.clone(),
        registry.clone(),
        &config.cache,
    )));

    let source = Arc::new(InMemoryDataSource::with_records(vec![
        article("Hello", "published", 120),
        article("Draft", "draft", 3),
        article("Release notes", "published", 80),
        article("Roadmap", "published", 300),
    ]));
    let repository = Repository::new(source, events)
        .named("articles")
        .with_config(&config);

    let mut articles = CachedRepository::new(repository, store, registry.clone())
        .with_config(&config.cache)
        .with_request(RequestContext::new("https://api.example.com/articles?page=1"));
    articles.inner_mut().push_criterion(Published);

    // First read misses, second read hits
    let listed = articles.all().await?;
    println!("📚 {} published articles", listed.len());
    let again = articles.all().await?;
    println!("♻️  served {} articles from cache", again.len());
    println!(
        "🔑 registered keys: {:?}\n",
        registry.get_keys("articles")?
    );

    // Declarative conditions
    let popular = articles
        .find_where(&[Condition::spec("views", ">=", 100)])
        .await?;
    for item in &popular {
        println!("   ⭐ {} ({} views)", item.title, item.views);
    }

    // A write flushes the whole group
    let created = articles
        .create(article("Changelog", "published", 0))
        .await?;
    println!("\n✅ created {}", created.title);
    println!(
        "🧹 group evicted, keys still tracked: {:?}",
        registry.get_keys("articles")?
    );
    println!("📚 {} published articles", articles.all().await?.len());

    // Soft delete and restore
    articles.delete(created.id).await?;
    println!("🗑️  deleted, {} left", articles.all().await?.len());
    articles.restore(created.id).await?;
    println!("↩️  restored, {} again", articles.all().await?.len());

    // Ad hoc operations bypass the cache
    let total = articles
        .inner_mut()
        .execute(Operation::Aggregate {
            function: Aggregate::Sum,
            field: "views".into(),
        })
        .await?;
    println!("\n📈 total views of published articles: {}", total);

    registry.flush()?;
    println!("💾 registry persisted to {}", workdir.path().display());

    Ok(())
}
