//! Event fixtures.

use chronicle_core::clock::Clock;
use chronicle_core::event::PrimitiveEvent;
use uuid::Uuid;

/// Builds an unsequenced event with a small JSON-looking envelope.
#[must_use]
pub fn primitive_event(id: Uuid, version: i32, event_type: &str, clock: &dyn Clock) -> PrimitiveEvent {
    let envelope = format!(r#"{{"version":{version},"type":"{event_type}"}}"#).into_bytes();
    PrimitiveEvent::new(id, version, event_type, envelope, clock)
}

/// Builds versions `1..=count` for one aggregate, all of the same type.
#[must_use]
pub fn primitive_events(id: Uuid, count: i32, event_type: &str, clock: &dyn Clock) -> Vec<PrimitiveEvent> {
    (1..=count)
        .map(|version| primitive_event(id, version, event_type, clock))
        .collect()
}
