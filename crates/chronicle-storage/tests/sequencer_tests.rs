//! Integration tests for `PgPrimitiveEventSequencer`.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chronicle_core::config::StorageOptions;
use chronicle_core::error::StorageError;
use chronicle_core::repository::{PrimitiveEventQuery, PrimitiveEventRepository};
use chronicle_core::sequencer::PrimitiveEventSequencer;
use chronicle_core::specification::Specification;
use chronicle_storage::Storage;
use chronicle_storage::lock::AdvisoryLock;
use chronicle_storage::sequencer::{PgPrimitiveEventSequencer, SEQUENCER_RESOURCE};
use chronicle_test_support::{FixedClock, primitive_event, primitive_events};
use sqlx::PgPool;
use uuid::Uuid;

async fn sequence_to_quiescence(sequencer: &dyn PrimitiveEventSequencer) -> usize {
    let mut runs = 0;
    while sequencer.sequence().await.unwrap() {
        runs += 1;
    }
    runs
}

// --- end to end ---

#[sqlx::test(migrations = false)]
async fn test_batch_is_sequenced_contiguously_after_the_watermark(pool: PgPool) {
    let storage = common::storage(pool).await;
    let clock = common::stepping_clock();
    let earlier = Uuid::new_v4();
    storage
        .events()
        .append(&primitive_events(earlier, 2, "OrderPlaced", &clock))
        .await
        .unwrap();
    storage.sequencer().sequence().await.unwrap();
    let watermark = storage.events().max_sequence_number().await.unwrap();

    let id = Uuid::new_v4();
    storage
        .events()
        .append(&primitive_events(id, 5, "OrderPlaced", &clock))
        .await
        .unwrap();
    assert!(storage.sequencer().sequence().await.unwrap());

    let found = storage
        .query()
        .search(&Specification::new().with_sequence_number_start(watermark + 1))
        .await
        .unwrap();
    let versions: Vec<i32> = found.iter().map(|e| e.version).collect();
    let numbers: Vec<i64> = found.iter().filter_map(|e| e.sequence_number).collect();
    assert!(found.iter().all(|e| e.id == id));
    assert_eq!(versions, [1, 2, 3, 4, 5]);
    assert_eq!(numbers, (watermark + 1..=watermark + 5).collect::<Vec<_>>());
}

#[sqlx::test(migrations = false)]
async fn test_numbers_follow_recorded_at_order(pool: PgPool) {
    let storage = common::storage(pool).await;
    let clock = common::stepping_clock();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let first = primitive_event(a, 1, "OrderPlaced", &clock);
    let second = primitive_event(b, 1, "OrderPlaced", &clock);
    let third = primitive_event(a, 2, "OrderPlaced", &clock);
    storage.events().append(&[third.clone()]).await.unwrap();
    storage.events().append(&[second.clone()]).await.unwrap();
    storage.events().append(&[first.clone()]).await.unwrap();

    storage.sequencer().sequence().await.unwrap();

    let found = storage.query().search(&Specification::new()).await.unwrap();
    let order: Vec<Uuid> = found.iter().map(|e| e.event_id).collect();
    assert_eq!(order, [first.event_id, second.event_id, third.event_id]);
}

#[sqlx::test(migrations = false)]
async fn test_equal_recorded_at_is_ranked_by_version(pool: PgPool) {
    let storage = common::storage(pool).await;
    let clock = FixedClock(common::epoch());
    for version in [3, 1, 2] {
        storage
            .events()
            .append(&[primitive_event(Uuid::new_v4(), version, "OrderPlaced", &clock)])
            .await
            .unwrap();
    }

    storage.sequencer().sequence().await.unwrap();

    let found = storage.query().search(&Specification::new()).await.unwrap();
    let ranked: Vec<(i32, Option<i64>)> = found.iter().map(|e| (e.version, e.sequence_number)).collect();
    assert_eq!(ranked, [(1, Some(1)), (2, Some(2)), (3, Some(3))]);
    assert!(found.iter().all(|e| e.recorded_at == common::epoch()));
}

#[sqlx::test(migrations = false)]
async fn test_batch_size_caps_each_run(pool: PgPool) {
    let options = StorageOptions::builder("postgres://provided-by-sqlx-test")
        .schema(common::SCHEMA)
        .sequencer_batch_size(2)
        .build()
        .unwrap();
    let storage = Storage::with_pool(pool, options).await.unwrap();
    let clock = common::stepping_clock();
    storage
        .events()
        .append(&primitive_events(Uuid::new_v4(), 5, "OrderPlaced", &clock))
        .await
        .unwrap();

    let runs = sequence_to_quiescence(storage.sequencer().as_ref()).await;

    assert_eq!(runs, 3);
    assert_eq!(storage.events().max_sequence_number().await.unwrap(), 5);
}

// --- idempotence ---

#[sqlx::test(migrations = false)]
async fn test_sequencing_without_work_is_idempotent(pool: PgPool) {
    let storage = common::storage(pool).await;
    let clock = common::stepping_clock();
    let id = Uuid::new_v4();
    storage
        .events()
        .append(&primitive_events(id, 3, "OrderPlaced", &clock))
        .await
        .unwrap();
    sequence_to_quiescence(storage.sequencer().as_ref()).await;
    let before = storage.events().get(id).await.unwrap();

    for _ in 0..3 {
        assert!(!storage.sequencer().sequence().await.unwrap());
    }

    assert_eq!(storage.events().get(id).await.unwrap(), before);
}

#[sqlx::test(migrations = false)]
async fn test_empty_log_has_nothing_to_sequence(pool: PgPool) {
    let storage = common::storage(pool).await;

    assert!(!storage.sequencer().sequence().await.unwrap());
}

// --- concurrency ---

#[sqlx::test(migrations = false)]
async fn test_concurrent_appends_and_sequencers_yield_unique_numbers(pool: PgPool) {
    let storage = common::storage(pool).await;
    let clock = Arc::new(common::stepping_clock());

    let mut appends = Vec::new();
    for _ in 0..8 {
        let events = storage.events();
        let clock = clock.clone();
        appends.push(tokio::spawn(async move {
            let batch = primitive_events(Uuid::new_v4(), 4, "OrderPlaced", clock.as_ref());
            events.append(&batch).await.unwrap();
        }));
    }
    let mut sequencers = Vec::new();
    for _ in 0..3 {
        let sequencer = storage.sequencer();
        sequencers.push(tokio::spawn(async move {
            for _ in 0..5 {
                sequencer.sequence().await.unwrap();
            }
        }));
    }
    for handle in appends.into_iter().chain(sequencers) {
        handle.await.unwrap();
    }
    sequence_to_quiescence(storage.sequencer().as_ref()).await;

    let found = storage.query().search(&Specification::new()).await.unwrap();
    let numbers: Vec<i64> = found.iter().filter_map(|e| e.sequence_number).collect();
    let unique: HashSet<i64> = numbers.iter().copied().collect();
    assert_eq!(found.len(), 32);
    assert_eq!(numbers.len(), 32);
    assert_eq!(unique.len(), 32);
}

#[sqlx::test(migrations = false)]
async fn test_held_lock_times_out_as_retryable(pool: PgPool) {
    let storage = common::storage(pool.clone()).await;
    let resource = format!("{}.{SEQUENCER_RESOURCE}", common::SCHEMA);
    let holder = AdvisoryLock::new(pool.clone(), Duration::from_secs(1));
    let guard = holder.acquire(&resource).await.unwrap();
    let sequencer = PgPrimitiveEventSequencer::new(
        AdvisoryLock::new(pool, Duration::from_millis(200)),
        common::SCHEMA,
        10,
    );

    let result = sequencer.sequence().await;

    assert!(matches!(result, Err(StorageError::LockTimeout { .. })));
    assert!(result.unwrap_err().is_retryable());
    guard.release().await.unwrap();
    assert!(!storage.sequencer().sequence().await.unwrap());
}

#[sqlx::test(migrations = false)]
async fn test_dropped_guard_frees_the_lock(pool: PgPool) {
    let resource = format!("{}.{SEQUENCER_RESOURCE}", common::SCHEMA);
    let lock = AdvisoryLock::new(pool, Duration::from_secs(2));

    drop(lock.acquire(&resource).await.unwrap());

    let guard = lock.acquire(&resource).await.unwrap();
    guard.release().await.unwrap();
}
