//! Shared test doubles and fixtures for Chronicle.

mod clock;
mod fixtures;
mod legacy;
mod sequencer;

pub use clock::{FixedClock, SteppingClock};
pub use fixtures::{primitive_event, primitive_events};
pub use legacy::{legacy_envelope, legacy_schema_sql, legacy_unsequenced_schema_sql};
pub use sequencer::ScriptedSequencer;
