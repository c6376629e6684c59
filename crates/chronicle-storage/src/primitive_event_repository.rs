//! `PostgreSQL` implementation of the `PrimitiveEventRepository` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::error::StorageError;
use chronicle_core::event::PrimitiveEvent;
use chronicle_core::repository::{EventTypeRepository, PrimitiveEventRepository};
use chronicle_core::specification::Specification;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{is_unique_violation, storage_error};
use crate::row::{EVENT_COLUMNS, PrimitiveEventRow, push_filters, resolve_event_types};

/// PostgreSQL-backed write side of the primitive event log.
pub struct PgPrimitiveEventRepository {
    pool: PgPool,
    schema: String,
    event_types: Arc<dyn EventTypeRepository>,
}

impl std::fmt::Debug for PgPrimitiveEventRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPrimitiveEventRepository")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl PgPrimitiveEventRepository {
    /// Creates a new `PgPrimitiveEventRepository`. Event type names are
    /// resolved through `event_types`.
    #[must_use]
    pub fn new(pool: PgPool, schema: &str, event_types: Arc<dyn EventTypeRepository>) -> Self {
        Self {
            pool,
            schema: schema.to_owned(),
            event_types,
        }
    }
}

#[async_trait]
impl PrimitiveEventRepository for PgPrimitiveEventRepository {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(&self, events: &[PrimitiveEvent]) -> Result<(), StorageError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut event_type_ids = Vec::with_capacity(events.len());
        for event in events {
            if event.is_sequenced() {
                return Err(StorageError::InvalidEvent(format!(
                    "event {} version {} already carries a sequence number",
                    event.id, event.version
                )));
            }
            event_type_ids.push(self.event_types.id_for(&event.event_type).await?);
        }

        let sql = format!(
            "INSERT INTO {}.primitive_event \
             (id, version, correlation_id, envelope, event_id, event_type_id, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.schema
        );

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for (event, event_type_id) in events.iter().zip(event_type_ids) {
            sqlx::query(&sql)
                .bind(event.id)
                .bind(event.version)
                .bind(event.correlation_id)
                .bind(&event.envelope)
                .bind(event.event_id)
                .bind(event_type_id)
                .bind(event.recorded_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StorageError::DuplicateVersion {
                            id: event.id,
                            version: event.version,
                        }
                    } else {
                        storage_error(e)
                    }
                })?;
        }
        tx.commit().await.map_err(storage_error)?;

        tracing::debug!("events appended");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Vec<PrimitiveEvent>, StorageError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM {schema}.primitive_event pe \
             INNER JOIN {schema}.event_type et ON et.id = pe.event_type_id \
             WHERE pe.id = $1 ORDER BY pe.version",
            schema = self.schema
        );

        let rows: Vec<PrimitiveEventRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(rows.into_iter().map(PrimitiveEvent::from).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn remove(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query(&format!("DELETE FROM {}.primitive_event WHERE id = $1", self.schema))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn remove_matching(&self, specification: &Specification) -> Result<u64, StorageError> {
        if specification.is_unfiltered() {
            tracing::warn!("refusing to remove events with an unfiltered specification");
            return Ok(0);
        }

        let event_type_ids =
            resolve_event_types(self.event_types.as_ref(), specification.event_types()).await?;
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "DELETE FROM {}.primitive_event pe WHERE TRUE",
            self.schema
        ));
        push_filters(&mut builder, specification, &event_type_ids);

        let removed = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(storage_error)?
            .rows_affected();

        tracing::info!(removed, "events removed");
        Ok(removed)
    }

    async fn max_sequence_number(&self) -> Result<i64, StorageError> {
        sqlx::query_scalar(&format!(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM {}.primitive_event",
            self.schema
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)
    }

    async fn sequence_number_of(&self, event_id: Uuid) -> Result<Option<i64>, StorageError> {
        let sequence_number: Option<Option<i64>> = sqlx::query_scalar(&format!(
            "SELECT sequence_number FROM {}.primitive_event WHERE event_id = $1",
            self.schema
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(sequence_number.flatten())
    }
}
