//! Shared helpers for storage integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use chronicle_core::config::StorageOptions;
use chronicle_storage::Storage;
use chronicle_test_support::SteppingClock;
use sqlx::PgPool;

pub const SCHEMA: &str = "ledger";

/// Fixed start instant used across all integration tests.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// A clock that ticks one millisecond per reading from [`epoch`].
pub fn stepping_clock() -> SteppingClock {
    SteppingClock::new(epoch(), chrono::Duration::milliseconds(1))
}

pub fn options() -> StorageOptions {
    StorageOptions::builder("postgres://provided-by-sqlx-test")
        .schema(SCHEMA)
        .sequencer_batch_size(100)
        .build()
        .unwrap()
}

/// Wires every component over the test pool, creating the schema.
pub async fn storage(pool: PgPool) -> Storage {
    Storage::with_pool(pool, options()).await.unwrap()
}
