//! Named, session-scoped cross-process mutex over PostgreSQL advisory locks.
//!
//! A lock is held by one pooled connection. It is released explicitly with
//! [`AdvisoryLockGuard::release`]; if a guard is dropped without being
//! released (a cancelled future, an early return) its connection is detached
//! from the pool and closed, which ends the session and makes the server
//! drop the lock. A crashed process loses its session the same way.

use std::time::Duration;

use chronicle_core::error::StorageError;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use tokio::time::Instant;

use crate::error::storage_error;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Derives the 64-bit advisory lock key for a resource name.
#[must_use]
pub fn lock_key(resource: &str) -> i64 {
    let digest = Sha256::digest(resource.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Factory for advisory lock guards with a bounded wait.
#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    pool: PgPool,
    timeout: Duration,
}

impl AdvisoryLock {
    #[must_use]
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Maximum time [`Self::acquire`] waits.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits up to the configured timeout for exclusive ownership of
    /// `resource`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::LockTimeout` if the lock is still held by
    /// another session when the deadline passes, or `StorageError::Storage`
    /// if no connection could be obtained.
    #[tracing::instrument(skip(self), fields(key = lock_key(resource)))]
    pub async fn acquire(&self, resource: &str) -> Result<AdvisoryLockGuard, StorageError> {
        let deadline = Instant::now() + self.timeout;
        let key = lock_key(resource);
        let mut connection = self.pool.acquire().await.map_err(storage_error)?;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(key)
                .fetch_one(&mut *connection)
                .await
                .map_err(storage_error)?;

            if acquired {
                tracing::debug!("lock acquired");
                return Ok(AdvisoryLockGuard {
                    resource: resource.to_owned(),
                    key,
                    connection: Some(connection),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StorageError::LockTimeout {
                    resource: resource.to_owned(),
                    timeout: self.timeout,
                });
            }

            let jitter = Duration::from_millis(rand::rng().random_range(0..=25));
            tokio::time::sleep((backoff + jitter).min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

/// Ownership of one advisory lock, tied to the connection that took it.
#[derive(Debug)]
pub struct AdvisoryLockGuard {
    resource: String,
    key: i64,
    connection: Option<PoolConnection<Postgres>>,
}

impl AdvisoryLockGuard {
    /// The locked resource name.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The session holding the lock. Work that must happen under the lock
    /// runs on this connection.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Storage` if the session is gone.
    pub fn connection(&mut self) -> Result<&mut PgConnection, StorageError> {
        self.connection
            .as_deref_mut()
            .ok_or_else(|| StorageError::Storage(format!("lock '{}' lost its session", self.resource)))
    }

    /// Releases the lock and returns the connection to the pool.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Storage` if the unlock statement fails; the
    /// connection is then closed, so the lock is released regardless.
    pub async fn release(mut self) -> Result<(), StorageError> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };

        match sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *connection)
            .await
        {
            Ok(true) => {
                tracing::debug!(resource = %self.resource, "lock released");
                Ok(())
            }
            Ok(false) => {
                tracing::warn!(resource = %self.resource, "lock was not held at release");
                drop(connection.detach());
                Ok(())
            }
            Err(e) => {
                drop(connection.detach());
                Err(storage_error(e))
            }
        }
    }
}

impl Drop for AdvisoryLockGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::warn!(
                resource = %self.resource,
                "lock guard dropped without release, closing its session"
            );
            drop(connection.detach());
        }
    }
}

/// Runs the release after the critical section, preferring the critical
/// section's error over a release failure.
pub(crate) fn settle<T>(
    result: Result<T, StorageError>,
    released: Result<(), StorageError>,
) -> Result<T, StorageError> {
    let value = result?;
    released?;
    Ok(value)
}
