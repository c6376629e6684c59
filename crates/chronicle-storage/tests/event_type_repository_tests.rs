//! Integration tests for `PgEventTypeRepository`.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chronicle_core::error::StorageError;
use chronicle_core::repository::EventTypeRepository;
use chronicle_storage::event_type_repository::PgEventTypeRepository;
use sqlx::PgPool;
use uuid::Uuid;

async fn persisted_rows(pool: &PgPool, type_name: &str) -> i64 {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {}.event_type WHERE lower(type_name) = lower($1)",
        common::SCHEMA
    ))
    .bind(type_name)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[sqlx::test(migrations = false)]
async fn test_names_resolve_case_insensitively(pool: PgPool) {
    let storage = common::storage(pool).await;
    let registry = storage.event_types();

    let id = registry.id_for("OrderPlaced").await.unwrap();

    assert_eq!(registry.id_for("orderplaced").await.unwrap(), id);
    assert_eq!(registry.id_for("  ORDERPLACED ").await.unwrap(), id);
    assert_ne!(registry.id_for("OrderShipped").await.unwrap(), id);
    assert_eq!(registry.cached_len().await, 2);
}

#[sqlx::test(migrations = false)]
async fn test_empty_name_is_rejected(pool: PgPool) {
    let storage = common::storage(pool).await;

    let result = storage.event_types().id_for("   ").await;

    assert!(matches!(result, Err(StorageError::InvalidEvent(_))));
}

#[sqlx::test(migrations = false)]
async fn test_concurrent_first_resolution_persists_one_row(pool: PgPool) {
    let storage = common::storage(pool.clone()).await;
    let registry = storage.event_types();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move { registry.id_for("InventoryAdjusted").await }));
    }
    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap());
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(persisted_rows(&pool, "InventoryAdjusted").await, 1);
}

#[sqlx::test(migrations = false)]
async fn test_separate_registries_agree_through_the_database(pool: PgPool) {
    let _storage = common::storage(pool.clone()).await;
    let registries: Vec<Arc<PgEventTypeRepository>> = (0..4)
        .map(|_| Arc::new(PgEventTypeRepository::new(pool.clone(), common::SCHEMA)))
        .collect();

    let mut handles = Vec::new();
    for registry in &registries {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move { registry.id_for("PaymentCaptured").await }));
    }
    let mut ids: Vec<Uuid> = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(persisted_rows(&pool, "PaymentCaptured").await, 1);
}
