//! Storage error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for every storage operation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An event with the same `(id, version)` already exists.
    #[error("duplicate version: aggregate {id} already has an event at version {version}")]
    DuplicateVersion {
        /// The aggregate the event belongs to.
        id: Uuid,
        /// The conflicting version.
        version: i32,
    },

    /// The unique key is already mapped to an identity.
    #[error("duplicate key: '{0}' is already mapped to an identity")]
    DuplicateKey(String),

    /// The cross-process lock could not be acquired in time.
    #[error("timed out after {timeout:?} waiting for lock '{resource}'")]
    LockTimeout {
        /// The lock resource name.
        resource: String,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The live schema has the shape of an older version.
    #[error(
        "schema '{schema}' is stale ({}); run `chronicle-upgrade --connection-string <target> --schema {schema}` before starting",
        reasons.join(", ")
    )]
    SchemaStale {
        /// The schema that was inspected.
        schema: String,
        /// The legacy markers that were found.
        reasons: Vec<String>,
    },

    /// A stored envelope could not be parsed in the expected format.
    #[error("envelope of event {id} version {version} could not be decoded: {reason}")]
    EnvelopeDecode {
        /// The aggregate the event belongs to.
        id: Uuid,
        /// The version of the failing row.
        version: i32,
        /// The sequence number of the failing row, if it had one.
        sequence_number: Option<i64>,
        /// Decoder message.
        reason: String,
    },

    /// The caller supplied an event that cannot be stored.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connectivity or driver error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl StorageError {
    /// Returns `true` for failures a driver loop may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Storage(_))
    }

    /// Returns `true` for uniqueness conflicts the caller must resolve.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::DuplicateVersion { .. } | Self::DuplicateKey(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_and_storage_errors_are_retryable() {
        let timeout = StorageError::LockTimeout {
            resource: "primitive-event-sequencer".into(),
            timeout: Duration::from_secs(15),
        };
        assert!(timeout.is_retryable());
        assert!(StorageError::Storage("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_conflicts_and_stale_schema_are_not_retryable() {
        let duplicate = StorageError::DuplicateVersion {
            id: Uuid::new_v4(),
            version: 1,
        };
        assert!(!duplicate.is_retryable());
        assert!(duplicate.is_conflict());
        assert!(StorageError::DuplicateKey("a".into()).is_conflict());

        let stale = StorageError::SchemaStale {
            schema: "dbo".into(),
            reasons: vec!["legacy column 'date_registered'".into()],
        };
        assert!(!stale.is_retryable());
        assert!(!stale.is_conflict());
    }

    #[test]
    fn test_schema_stale_message_names_the_upgrade_tool() {
        let stale = StorageError::SchemaStale {
            schema: "events".into(),
            reasons: vec![
                "'sequence_number' is an identity column".into(),
                "legacy column 'date_registered'".into(),
            ],
        };

        let message = stale.to_string();

        assert!(message.contains("chronicle-upgrade"));
        assert!(message.contains("--schema events"));
        assert!(message.contains("identity column, legacy column"));
    }
}
