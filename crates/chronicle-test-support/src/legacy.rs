//! Fixtures for the pre-upgrade storage layout.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// DDL for a schema in the legacy layout: identity sequence numbers and a
/// `date_registered` column instead of `recorded_at`.
#[must_use]
pub fn legacy_schema_sql(schema: &str) -> String {
    legacy_layout(schema, "BIGINT GENERATED ALWAYS AS IDENTITY")
}

/// DDL for the legacy layout whose sequence numbers were assigned by a
/// separate sequencer, so rows may still be waiting with a NULL number.
#[must_use]
pub fn legacy_unsequenced_schema_sql(schema: &str) -> String {
    legacy_layout(schema, "BIGINT NULL")
}

fn legacy_layout(schema: &str, sequence_number: &str) -> String {
    format!(
        r"
CREATE SCHEMA IF NOT EXISTS {schema};

CREATE TABLE IF NOT EXISTS {schema}.event_type (
    id        UUID NOT NULL,
    type_name VARCHAR(1024) NOT NULL,
    CONSTRAINT pk_event_type PRIMARY KEY (id)
);

CREATE TABLE IF NOT EXISTS {schema}.primitive_event (
    id              UUID NOT NULL,
    version         INTEGER NOT NULL,
    correlation_id  UUID NULL,
    envelope        BYTEA NOT NULL,
    event_id        UUID NOT NULL,
    event_type_id   UUID NOT NULL,
    sequence_number {sequence_number},
    date_registered TIMESTAMP NOT NULL,
    CONSTRAINT pk_primitive_event PRIMARY KEY (id, version)
);
"
    )
}

/// A legacy envelope as the old writers serialized it (PascalCase keys,
/// base64 event bytes).
#[must_use]
pub fn legacy_envelope(event_type: &str, version: i32, event: &[u8], event_date: DateTime<Utc>) -> Vec<u8> {
    serde_json::json!({
        "AssemblyQualifiedName": format!("{event_type}, Legacy.Events"),
        "CompressionAlgorithm": "",
        "EncryptionAlgorithm": "",
        "Event": STANDARD.encode(event),
        "EventDate": event_date,
        "EventId": Uuid::new_v4(),
        "EventType": event_type,
        "Headers": [{ "Key": "origin", "Value": "legacy" }],
        "Version": version,
    })
    .to_string()
    .into_bytes()
}
