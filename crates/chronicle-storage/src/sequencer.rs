//! `PostgreSQL` implementation of the `PrimitiveEventSequencer` trait.
//!
//! Numbering happens under a cross-process advisory lock so that exactly
//! one sequencer at a time reads the watermark and assigns the next block.

use async_trait::async_trait;
use chronicle_core::error::StorageError;
use chronicle_core::sequencer::PrimitiveEventSequencer;
use sqlx::{Connection, PgConnection};

use crate::error::storage_error;
use crate::lock::{AdvisoryLock, settle};

/// Lock resource name, prefixed by the schema it protects.
pub const SEQUENCER_RESOURCE: &str = "primitive-event-sequencer";

/// Assigns gap-free-at-assignment sequence numbers to unsequenced events.
#[derive(Debug)]
pub struct PgPrimitiveEventSequencer {
    lock: AdvisoryLock,
    resource: String,
    batch_size: i64,
    watermark_sql: String,
    assign_sql: String,
}

impl PgPrimitiveEventSequencer {
    /// Creates a sequencer for `schema` that numbers at most `batch_size`
    /// events per run.
    #[must_use]
    pub fn new(lock: AdvisoryLock, schema: &str, batch_size: u32) -> Self {
        Self {
            lock,
            resource: format!("{schema}.{SEQUENCER_RESOURCE}"),
            batch_size: i64::from(batch_size.max(1)),
            watermark_sql: format!("SELECT COALESCE(MAX(sequence_number), 0) FROM {schema}.primitive_event"),
            assign_sql: format!(
                r"
WITH candidates AS (
    SELECT id, version, recorded_at
    FROM {schema}.primitive_event
    WHERE sequence_number IS NULL
    ORDER BY recorded_at, version, id
    LIMIT $1
    FOR UPDATE
),
ranked AS (
    SELECT id, version, ROW_NUMBER() OVER (ORDER BY recorded_at, version, id) AS rank
    FROM candidates
)
UPDATE {schema}.primitive_event pe
SET sequence_number = $2 + ranked.rank
FROM ranked
WHERE pe.id = ranked.id AND pe.version = ranked.version
"
            ),
        }
    }

    async fn assign_batch(&self, connection: &mut PgConnection) -> Result<u64, StorageError> {
        let mut tx = connection.begin().await.map_err(storage_error)?;

        let watermark: i64 = sqlx::query_scalar(&self.watermark_sql)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_error)?;

        let assigned = sqlx::query(&self.assign_sql)
            .bind(self.batch_size)
            .bind(watermark)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?
            .rows_affected();

        tx.commit().await.map_err(storage_error)?;

        if assigned > 0 {
            tracing::debug!(watermark, assigned, "sequence numbers assigned");
        }
        Ok(assigned)
    }
}

#[async_trait]
impl PrimitiveEventSequencer for PgPrimitiveEventSequencer {
    #[tracing::instrument(skip(self), fields(resource = %self.resource))]
    async fn sequence(&self) -> Result<bool, StorageError> {
        let mut guard = self.lock.acquire(&self.resource).await?;
        let result = match guard.connection() {
            Ok(connection) => self.assign_batch(connection).await,
            Err(e) => Err(e),
        };
        let released = guard.release().await;

        Ok(settle(result, released)? > 0)
    }
}
