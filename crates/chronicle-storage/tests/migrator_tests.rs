//! Integration tests for `SchemaMigrator`.

mod common;

use std::time::Duration;

use chronicle_core::config::StorageOptions;
use chronicle_core::error::StorageError;
use chronicle_storage::Storage;
use chronicle_storage::lock::AdvisoryLock;
use chronicle_storage::migrator::{MIGRATOR_RESOURCE, MigrationOutcome, SchemaMigrator};
use chronicle_storage::schema::{self, SchemaDescriptor, SchemaState};
use chronicle_test_support::legacy_schema_sql;
use sqlx::{Executor, PgPool};

async fn state(pool: &PgPool) -> SchemaState {
    let descriptor = SchemaDescriptor::current();
    let mut connection = pool.acquire().await.unwrap();
    let live = schema::introspect(&mut connection, common::SCHEMA, &descriptor)
        .await
        .unwrap();
    descriptor.classify(&live)
}

#[sqlx::test(migrations = false)]
async fn test_fresh_database_is_created_then_current(pool: PgPool) {
    assert_eq!(state(&pool).await, SchemaState::Absent);

    let created = SchemaMigrator::new(pool.clone(), &common::options())
        .run()
        .await
        .unwrap();
    let again = SchemaMigrator::new(pool.clone(), &common::options())
        .run()
        .await
        .unwrap();

    assert_eq!(created, MigrationOutcome::Created);
    assert_eq!(again, MigrationOutcome::Current);
    assert_eq!(state(&pool).await, SchemaState::Current);
}

#[sqlx::test(migrations = false)]
async fn test_partial_schema_is_repaired(pool: PgPool) {
    pool.execute(schema::create_schema(common::SCHEMA).as_str())
        .await
        .unwrap();
    pool.execute(schema::create_event_type_table(common::SCHEMA).as_str())
        .await
        .unwrap();

    let outcome = SchemaMigrator::new(pool.clone(), &common::options())
        .run()
        .await
        .unwrap();

    let MigrationOutcome::Repaired { missing } = outcome else {
        panic!("expected a repair, got {outcome:?}");
    };
    assert!(missing.contains(&"table primitive_event".to_owned()));
    assert!(missing.contains(&"table id_key".to_owned()));
    assert_eq!(state(&pool).await, SchemaState::Current);
}

#[sqlx::test(migrations = false)]
async fn test_legacy_schema_is_stale_and_not_retried(pool: PgPool) {
    pool.execute(legacy_schema_sql(common::SCHEMA).as_str())
        .await
        .unwrap();

    let result = Storage::with_pool(pool.clone(), common::options()).await;

    match result {
        Err(StorageError::SchemaStale { schema, reasons }) => {
            assert_eq!(schema, common::SCHEMA);
            assert!(reasons.iter().any(|r| r.contains("sequence_number is server-generated")));
            assert!(reasons.iter().any(|r| r.contains("date_registered")));
        }
        other => panic!("expected SchemaStale, got {other:?}"),
    }
    assert!(matches!(state(&pool).await, SchemaState::Stale { .. }));
}

#[sqlx::test(migrations = false)]
async fn test_disabled_configuration_skips_migration(pool: PgPool) {
    let options = StorageOptions::builder("postgres://provided-by-sqlx-test")
        .schema(common::SCHEMA)
        .configure_database(false)
        .build()
        .unwrap();

    let outcome = SchemaMigrator::new(pool.clone(), &options).run().await.unwrap();

    assert_eq!(outcome, MigrationOutcome::Skipped);
    assert_eq!(state(&pool).await, SchemaState::Absent);
}

#[sqlx::test(migrations = false)]
async fn test_legacy_schema_is_rejected_when_configuration_is_disabled(pool: PgPool) {
    pool.execute(legacy_schema_sql(common::SCHEMA).as_str())
        .await
        .unwrap();
    let options = StorageOptions::builder("postgres://provided-by-sqlx-test")
        .schema(common::SCHEMA)
        .configure_database(false)
        .build()
        .unwrap();

    let result = Storage::with_pool(pool.clone(), options).await;

    assert!(matches!(result, Err(StorageError::SchemaStale { ref schema, .. }) if schema == common::SCHEMA));
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("chronicle-upgrade")
    );
}

#[sqlx::test(migrations = false)]
async fn test_concurrent_migrators_create_the_schema_once(pool: PgPool) {
    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            SchemaMigrator::new(pool, &common::options()).run().await
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(
        outcomes.iter().filter(|o| **o == MigrationOutcome::Created).count(),
        1
    );
    assert_eq!(
        outcomes.iter().filter(|o| **o == MigrationOutcome::Current).count(),
        3
    );
}

#[sqlx::test(migrations = false)]
async fn test_held_migrator_lock_exhausts_retries(pool: PgPool) {
    let resource = format!("{}.{MIGRATOR_RESOURCE}", common::SCHEMA);
    let guard = AdvisoryLock::new(pool.clone(), Duration::from_secs(1))
        .acquire(&resource)
        .await
        .unwrap();
    let options = StorageOptions::builder("postgres://provided-by-sqlx-test")
        .schema(common::SCHEMA)
        .lock_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let result = SchemaMigrator::new(pool.clone(), &options).run().await;

    assert!(matches!(result, Err(StorageError::LockTimeout { .. })));
    guard.release().await.unwrap();
}
