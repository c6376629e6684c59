//! Row mapping and filter construction shared by the log repository and
//! query.

use chrono::{DateTime, Utc};
use chronicle_core::error::StorageError;
use chronicle_core::event::PrimitiveEvent;
use chronicle_core::repository::EventTypeRepository;
use chronicle_core::specification::Specification;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

/// Columns selected for a `PrimitiveEventRow`, with `pe` aliasing
/// `primitive_event` and `et` aliasing `event_type`.
pub(crate) const EVENT_COLUMNS: &str = "pe.id, pe.version, pe.correlation_id, pe.envelope, \
     pe.event_id, et.type_name, pe.sequence_number, pe.recorded_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PrimitiveEventRow {
    id: Uuid,
    version: i32,
    correlation_id: Option<Uuid>,
    envelope: Vec<u8>,
    event_id: Uuid,
    type_name: String,
    sequence_number: Option<i64>,
    recorded_at: DateTime<Utc>,
}

impl From<PrimitiveEventRow> for PrimitiveEvent {
    fn from(row: PrimitiveEventRow) -> Self {
        Self {
            id: row.id,
            version: row.version,
            event_id: row.event_id,
            event_type: row.type_name,
            envelope: row.envelope,
            correlation_id: row.correlation_id,
            sequence_number: row.sequence_number,
            recorded_at: row.recorded_at,
        }
    }
}

/// Resolves event type names to identifiers, creating unknown names.
pub(crate) async fn resolve_event_types(
    registry: &dyn EventTypeRepository,
    names: &[String],
) -> Result<Vec<Uuid>, StorageError> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        ids.push(registry.id_for(name).await?);
    }
    Ok(ids)
}

/// Appends ` AND ...` predicates for every filter `specification` carries.
/// The builder must already end in a `WHERE` clause.
pub(crate) fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    specification: &Specification,
    event_type_ids: &[Uuid],
) {
    if !event_type_ids.is_empty() {
        builder
            .push(" AND pe.event_type_id = ANY(")
            .push_bind(event_type_ids.to_vec())
            .push(")");
    }
    if specification.has_ids() {
        builder
            .push(" AND pe.id = ANY(")
            .push_bind(specification.ids().to_vec())
            .push(")");
    }
    if specification.has_sequence_numbers() {
        builder
            .push(" AND pe.sequence_number = ANY(")
            .push_bind(specification.sequence_numbers().to_vec())
            .push(")");
    }
    if specification.sequence_number_start() > 0 {
        builder
            .push(" AND pe.sequence_number >= ")
            .push_bind(specification.sequence_number_start());
    }
    if specification.sequence_number_end() > 0 {
        builder
            .push(" AND pe.sequence_number <= ")
            .push_bind(specification.sequence_number_end());
    }
}
