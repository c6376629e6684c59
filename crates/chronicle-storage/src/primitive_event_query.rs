//! `PostgreSQL` implementation of the `PrimitiveEventQuery` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::error::StorageError;
use chronicle_core::event::PrimitiveEvent;
use chronicle_core::repository::{EventTypeRepository, PrimitiveEventQuery};
use chronicle_core::specification::Specification;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::storage_error;
use crate::row::{EVENT_COLUMNS, PrimitiveEventRow, push_filters, resolve_event_types};

/// PostgreSQL-backed read side of the primitive event log.
pub struct PgPrimitiveEventQuery {
    pool: PgPool,
    schema: String,
    event_types: Arc<dyn EventTypeRepository>,
}

impl std::fmt::Debug for PgPrimitiveEventQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPrimitiveEventQuery")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl PgPrimitiveEventQuery {
    #[must_use]
    pub fn new(pool: PgPool, schema: &str, event_types: Arc<dyn EventTypeRepository>) -> Self {
        Self {
            pool,
            schema: schema.to_owned(),
            event_types,
        }
    }

    fn search_builder(
        &self,
        specification: &Specification,
        event_type_ids: &[uuid::Uuid],
    ) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {EVENT_COLUMNS} FROM {schema}.primitive_event pe \
             INNER JOIN {schema}.event_type et ON et.id = pe.event_type_id WHERE TRUE",
            schema = self.schema
        ));
        push_filters(&mut builder, specification, event_type_ids);
        builder.push(" ORDER BY pe.sequence_number ASC NULLS LAST, pe.recorded_at, pe.version");

        if specification.maximum_rows() > 0 {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(specification.maximum_rows()).unwrap_or(i64::MAX));
        }
        builder
    }
}

#[async_trait]
impl PrimitiveEventQuery for PgPrimitiveEventQuery {
    #[tracing::instrument(skip_all, fields(maximum_rows = specification.maximum_rows()))]
    async fn search(
        &self,
        specification: &Specification,
    ) -> Result<Vec<PrimitiveEvent>, StorageError> {
        let event_type_ids =
            resolve_event_types(self.event_types.as_ref(), specification.event_types()).await?;
        let mut builder = self.search_builder(specification, &event_type_ids);

        let rows: Vec<PrimitiveEventRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        tracing::debug!(found = rows.len(), "search complete");
        Ok(rows.into_iter().map(PrimitiveEvent::from).collect())
    }

    async fn max_sequence_number(
        &self,
        specification: &Specification,
    ) -> Result<Option<i64>, StorageError> {
        let event_type_ids =
            resolve_event_types(self.event_types.as_ref(), specification.event_types()).await?;
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT MAX(pe.sequence_number) FROM {}.primitive_event pe WHERE TRUE",
            self.schema
        ));
        push_filters(&mut builder, specification, &event_type_ids);

        builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }
}
