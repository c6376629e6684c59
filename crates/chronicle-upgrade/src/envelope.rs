//! Legacy and current event envelope codecs.
//!
//! Legacy envelopes were written with PascalCase keys and are read back
//! leniently: camelCase keys are accepted, and `EventDate` may lack an
//! offset, in which case it is taken as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvelopeHeader {
    #[serde(alias = "key")]
    pub key: String,
    #[serde(alias = "value")]
    pub value: String,
}

/// Envelope layout written before `RecordedAt` existed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LegacyEventEnvelope {
    #[serde(default, alias = "assemblyQualifiedName")]
    pub assembly_qualified_name: String,
    #[serde(default, alias = "compressionAlgorithm")]
    pub compression_algorithm: String,
    #[serde(default, alias = "encryptionAlgorithm")]
    pub encryption_algorithm: String,
    #[serde(default, alias = "event", with = "base64_bytes")]
    pub event: Vec<u8>,
    #[serde(default, alias = "eventDate", deserialize_with = "lenient_date")]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "eventId")]
    pub event_id: Option<Uuid>,
    #[serde(default, alias = "eventType")]
    pub event_type: String,
    #[serde(default, alias = "headers")]
    pub headers: Vec<EnvelopeHeader>,
    #[serde(default, alias = "version")]
    pub version: i32,
}

impl LegacyEventEnvelope {
    /// Parses a stored legacy envelope.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `bytes` is not a legacy envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Current envelope layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventEnvelope {
    pub assembly_qualified_name: String,
    pub compression_algorithm: String,
    pub encryption_algorithm: String,
    #[serde(with = "base64_bytes")]
    pub event: Vec<u8>,
    pub event_id: Uuid,
    pub event_type: String,
    pub headers: Vec<EnvelopeHeader>,
    pub recorded_at: DateTime<Utc>,
    pub version: i32,
}

impl EventEnvelope {
    /// Re-shapes a legacy envelope. `recorded_at` and `event_id` fill in
    /// fields the legacy envelope omitted, and come from the stored row.
    #[must_use]
    pub fn from_legacy(legacy: LegacyEventEnvelope, recorded_at: DateTime<Utc>, event_id: Uuid) -> Self {
        Self {
            assembly_qualified_name: legacy.assembly_qualified_name,
            compression_algorithm: legacy.compression_algorithm,
            encryption_algorithm: legacy.encryption_algorithm,
            event: legacy.event,
            event_id: legacy.event_id.unwrap_or(event_id),
            event_type: legacy.event_type,
            headers: legacy.headers,
            recorded_at: legacy.event_date.unwrap_or(recorded_at),
            version: legacy.version,
        }
    }

    /// # Errors
    ///
    /// Returns the JSON error if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(date) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(date.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
