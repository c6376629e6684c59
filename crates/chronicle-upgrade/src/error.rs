//! Upgrade tool error type.

use chronicle_core::error::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("envelope encoding failed: {0}")]
    Envelope(#[from] serde_json::Error),

    /// The target schema has nothing this tool can upgrade.
    #[error("schema '{0}' has no primitive_event table to upgrade")]
    NothingToUpgrade(String),
}
