//! The primitive event row.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;

/// One immutable, version-stamped fact recorded for an aggregate.
///
/// `(id, version)` identifies the row. `sequence_number` is `None` until the
/// sequencer assigns it, and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveEvent {
    /// Aggregate identity the event belongs to.
    pub id: Uuid,
    /// Version within the aggregate stream, starting at 1.
    pub version: i32,
    /// Unique identifier of the event itself.
    pub event_id: Uuid,
    /// Event type name, interned through the event type registry on write.
    pub event_type: String,
    /// Opaque serialized envelope.
    pub envelope: Vec<u8>,
    /// Optional correlation identifier.
    pub correlation_id: Option<Uuid>,
    /// Global sequence number, assigned after the fact.
    pub sequence_number: Option<i64>,
    /// When the event was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl PrimitiveEvent {
    /// Creates an unsequenced event stamped with `clock`.
    #[must_use]
    pub fn new(
        id: Uuid,
        version: i32,
        event_type: impl Into<String>,
        envelope: Vec<u8>,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            id,
            version,
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            envelope,
            correlation_id: None,
            sequence_number: None,
            recorded_at: clock.now(),
        }
    }

    /// Sets the correlation identifier.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Returns `true` once the sequencer has numbered this event.
    #[must_use]
    pub fn is_sequenced(&self) -> bool {
        self.sequence_number.is_some()
    }
}
