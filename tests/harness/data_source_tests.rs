//! Macro-generated test suite for `DataSource<Post>` contract validation.
//!
//! The `data_source_tests!` macro generates a test module that validates any
//! `DataSource<Post>` implementation against the contract the repository
//! relies on: filtered reads, windows and pagination, single and bulk
//! mutations, soft-delete visibility and concurrent access.
//!
//! # Usage
//!
//! ```rust,ignore
//! #[macro_use]
//! mod harness;
//!
//! use harness::*;
//! use cached_repo::storage::InMemoryDataSource;
//!
//! data_source_tests!(in_memory, InMemoryDataSource::<Post>::new());
//! ```
//!
//! # Generated Tests
//!
//! ## Reads
//! - `test_create_and_find`: create then find by id
//! - `test_get_filters_orders_and_windows`: where, order, limit, offset
//! - `test_count_ignores_window`
//! - `test_paginate` / `test_simple_paginate`
//! - `test_pluck_and_aggregate`
//!
//! ## Mutations
//! - `test_create_duplicate_id`: fails with `PersistenceFailure`
//! - `test_insert_batch`
//! - `test_update_merges_attributes` / `test_update_missing_is_not_found`
//! - `test_update_where_and_delete_where`
//!
//! ## Soft deletes
//! - `test_delete_hides_record`: visible again through `with_trashed`
//! - `test_restore_and_force_delete`
//!
//! ## Concurrency
//! - `test_concurrent_creates`: parallel creates from spawned tasks

/// Generate a `DataSource<Post>` conformance test module named `$name`.
///
/// `$factory` must evaluate to an empty source implementing
/// `DataSource<Post> + Clone + 'static`. It is re-evaluated for each test.
#[macro_export]
macro_rules! data_source_tests {
    ($name:ident, $factory:expr) => {
        mod $name {
            use super::*;
            use cached_repo::core::error::RepositoryError;
            use cached_repo::core::field::Comparison;
            use cached_repo::core::query::{Direction, Query};
            use cached_repo::core::service::{Aggregate, DataSource};
            use serde_json::json;
            use uuid::Uuid;

            async fn seeded() -> impl DataSource<Post> + Clone + 'static {
                let source = $factory;
                for post in sample_posts() {
                    source.create(post).await.unwrap();
                }
                source
            }

            // ==================================================================
            // Reads
            // ==================================================================

            #[tokio::test]
            async fn test_create_and_find() {
                let source = $factory;
                let created = source
                    .create(post("Alpha", "draft", 3, "2024-01-01"))
                    .await
                    .unwrap();

                let found = source.find(&Query::new(), created.id).await.unwrap();
                assert_eq!(found, Some(created));

                let missing = source.find(&Query::new(), Uuid::new_v4()).await.unwrap();
                assert!(missing.is_none());
            }

            #[tokio::test]
            async fn test_get_filters_orders_and_windows() {
                let source = seeded().await;

                let published = Query::new()
                    .where_eq("status", "published")
                    .order_by("views", Direction::Desc);
                let rows = source.get(&published).await.unwrap();
                assert_eq!(titles(&rows), vec!["Roadmap", "Hello", "Release"]);

                let window = published.clone().offset(1).limit(1);
                let rows = source.get(&window).await.unwrap();
                assert_eq!(titles(&rows), vec!["Hello"]);

                let popular = Query::new().where_cmp("views", Comparison::Gt, 100);
                assert_eq!(source.get(&popular).await.unwrap().len(), 2);
            }

            #[tokio::test]
            async fn test_count_ignores_window() {
                let source = seeded().await;
                let query = Query::new().where_eq("status", "published").limit(1);
                assert_eq!(source.count(&query).await.unwrap(), 3);
            }

            #[tokio::test]
            async fn test_paginate() {
                let source = seeded().await;
                let query = Query::new().order_by("title", Direction::Asc);

                let page = source.paginate(&query, 2, 2).await.unwrap();
                assert_eq!(page_titles(&page), vec!["Hello", "Release"]);
                assert_eq!(page.pagination.total, Some(5));
                assert_eq!(page.pagination.total_pages, Some(3));
                assert!(page.pagination.has_next);
                assert!(page.pagination.has_prev);

                let last = source.paginate(&query, 2, 3).await.unwrap();
                assert_eq!(page_titles(&last), vec!["Roadmap"]);
                assert!(!last.pagination.has_next);
            }

            #[tokio::test]
            async fn test_simple_paginate() {
                let source = seeded().await;
                let query = Query::new().order_by("title", Direction::Asc);

                let page = source.simple_paginate(&query, 4, 1).await.unwrap();
                assert_eq!(page.data.len(), 4);
                assert_eq!(page.pagination.total, None);
                assert!(page.pagination.has_next);

                let rest = source.simple_paginate(&query, 4, 2).await.unwrap();
                assert_eq!(page_titles(&rest), vec!["Roadmap"]);
                assert!(!rest.pagination.has_next);
            }

            #[tokio::test]
            async fn test_pluck_and_aggregate() {
                let source = seeded().await;
                let query = Query::new()
                    .where_eq("status", "published")
                    .order_by("views", Direction::Asc);

                let views = source.pluck(&query, "views").await.unwrap();
                assert_eq!(views, vec![json!(80), json!(120), json!(300)]);

                let max = source.aggregate(&query, Aggregate::Max, "views").await.unwrap();
                assert_eq!(max, json!(300));
                assert!(source.exists(&query).await.unwrap());
                assert!(!source
                    .exists(&Query::new().where_eq("status", "missing"))
                    .await
                    .unwrap());
            }

            // ==================================================================
            // Mutations
            // ==================================================================

            #[tokio::test]
            async fn test_create_duplicate_id() {
                let source = $factory;
                let original = post("Alpha", "draft", 0, "2024-01-01");
                source.create(original.clone()).await.unwrap();

                let err = source.create(original).await.unwrap_err();
                assert!(matches!(err, RepositoryError::PersistenceFailure { .. }));
            }

            #[tokio::test]
            async fn test_insert_batch() {
                let source = $factory;
                let inserted = source.insert(sample_posts()).await.unwrap();
                assert_eq!(inserted, 5);
                assert_eq!(source.count(&Query::new()).await.unwrap(), 5);
            }

            #[tokio::test]
            async fn test_update_merges_attributes() {
                let source = $factory;
                let created = source
                    .create(post("Alpha", "draft", 3, "2024-01-01"))
                    .await
                    .unwrap();

                let updated = source
                    .update(&Query::new(), created.id, json!({"status": "published", "id": Uuid::new_v4()}))
                    .await
                    .unwrap();
                assert_eq!(updated.id, created.id);
                assert_eq!(updated.status, "published");
                assert_eq!(updated.title, "Alpha");
            }

            #[tokio::test]
            async fn test_update_missing_is_not_found() {
                let source = $factory;
                let err = source
                    .update(&Query::new(), Uuid::new_v4(), json!({"title": "x"}))
                    .await
                    .unwrap_err();
                assert!(matches!(err, RepositoryError::NotFound { .. }));
            }

            #[tokio::test]
            async fn test_update_where_and_delete_where() {
                let source = seeded().await;
                let published = Query::new().where_eq("status", "published");

                let updated = source
                    .update_where(&published, json!({"status": "featured"}))
                    .await
                    .unwrap();
                assert_eq!(updated, 3);

                let featured = Query::new().where_eq("status", "featured");
                assert_eq!(source.delete_where(&featured).await.unwrap(), 3);
                assert_eq!(source.count(&Query::new()).await.unwrap(), 2);
            }

            // ==================================================================
            // Soft deletes
            // ==================================================================

            #[tokio::test]
            async fn test_delete_hides_record() {
                let source = $factory;
                let created = source
                    .create(post("Alpha", "draft", 0, "2024-01-01"))
                    .await
                    .unwrap();

                let deleted = source.delete(&Query::new(), created.id).await.unwrap();
                assert!(deleted.deleted_at.is_some());
                assert!(source.find(&Query::new(), created.id).await.unwrap().is_none());

                let trashed = source
                    .find(&Query::new().with_trashed(), created.id)
                    .await
                    .unwrap();
                assert!(trashed.is_some());
                assert_eq!(source.count(&Query::new().only_trashed()).await.unwrap(), 1);
            }

            #[tokio::test]
            async fn test_restore_and_force_delete() {
                let source = $factory;
                let created = source
                    .create(post("Alpha", "draft", 0, "2024-01-01"))
                    .await
                    .unwrap();
                source.delete(&Query::new(), created.id).await.unwrap();

                let restored = source
                    .restore(&Query::new().with_trashed(), created.id)
                    .await
                    .unwrap();
                assert!(restored.deleted_at.is_none());
                assert!(source.find(&Query::new(), created.id).await.unwrap().is_some());

                source.force_delete(&Query::new(), created.id).await.unwrap();
                let gone = source
                    .find(&Query::new().with_trashed(), created.id)
                    .await
                    .unwrap();
                assert!(gone.is_none());
            }

            // ==================================================================
            // Concurrency
            // ==================================================================

            #[tokio::test]
            async fn test_concurrent_creates() {
                let source = $factory;
                let mut handles = Vec::new();
                for i in 0..10 {
                    let source = source.clone();
                    handles.push(tokio::spawn(async move {
                        source
                            .create(post(&format!("Post {}", i), "draft", i, "2024-01-01"))
                            .await
                            .unwrap()
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
                assert_eq!(source.count(&Query::new()).await.unwrap(), 10);
            }
        }
    };
}
