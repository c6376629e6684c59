//! Mapping from driver errors to `StorageError`.

use chronicle_core::error::StorageError;

/// Wraps any driver failure as a transient storage error.
#[allow(clippy::needless_pass_by_value)]
pub(crate) fn storage_error(err: sqlx::Error) -> StorageError {
    StorageError::Storage(err.to_string())
}

/// Returns `true` if `err` is a uniqueness violation (SQLSTATE 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
