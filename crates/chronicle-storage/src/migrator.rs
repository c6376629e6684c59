//! Startup schema migration.
//!
//! Creates a missing or partial schema at the current layout and refuses to
//! start against a legacy layout, pointing at the offline upgrade tool
//! instead.

use std::time::Duration;

use chronicle_core::config::StorageOptions;
use chronicle_core::error::StorageError;
use sqlx::{Connection, Executor, PgConnection, PgPool};

use crate::error::storage_error;
use crate::lock::{AdvisoryLock, settle};
use crate::schema::{self, SchemaDescriptor, SchemaState};

pub const MIGRATOR_RESOURCE: &str = "schema-migrator";

/// Additional attempts after a transient failure.
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// What a migrator run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Database configuration is disabled.
    Skipped,
    /// The schema did not exist and was created.
    Created,
    /// Missing objects were added to a partial schema.
    Repaired { missing: Vec<String> },
    /// The schema already had the current layout.
    Current,
}

#[derive(Debug)]
pub struct SchemaMigrator {
    lock: AdvisoryLock,
    schema: String,
    configure_database: bool,
    descriptor: SchemaDescriptor,
}

impl SchemaMigrator {
    #[must_use]
    pub fn new(pool: PgPool, options: &StorageOptions) -> Self {
        Self {
            lock: AdvisoryLock::new(pool, options.lock_timeout()),
            schema: options.schema().to_owned(),
            configure_database: options.configure_database(),
            descriptor: SchemaDescriptor::current(),
        }
    }

    /// Brings the schema to the current layout.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::SchemaStale` if the live schema has a legacy
    /// layout, or the last transient error once retries are exhausted. A
    /// legacy layout is rejected even when database configuration is
    /// disabled.
    #[tracing::instrument(skip(self), fields(schema = %self.schema))]
    pub async fn run(&self) -> Result<MigrationOutcome, StorageError> {
        let mut attempt = 0;
        loop {
            match self.run_once().await {
                Ok(outcome) => {
                    tracing::info!(?outcome, "schema migration complete");
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "schema migration failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "schema migration failed");
                    return Err(e);
                }
            }
        }
    }

    async fn run_once(&self) -> Result<MigrationOutcome, StorageError> {
        let resource = format!("{}.{MIGRATOR_RESOURCE}", self.schema);
        let mut guard = self.lock.acquire(&resource).await?;
        let result = match guard.connection() {
            Ok(connection) => self.migrate(connection).await,
            Err(e) => Err(e),
        };
        let released = guard.release().await;
        settle(result, released)
    }

    async fn migrate(&self, connection: &mut PgConnection) -> Result<MigrationOutcome, StorageError> {
        let live = schema::introspect(connection, &self.schema, &self.descriptor).await?;
        tracing::debug!(fingerprint = %live.digest(), version = self.descriptor.version, "live schema read");

        let outcome = match self.descriptor.classify(&live) {
            SchemaState::Stale { reasons } => {
                return Err(StorageError::SchemaStale {
                    schema: self.schema.clone(),
                    reasons,
                });
            }
            _ if !self.configure_database => {
                tracing::info!("database configuration disabled, skipping schema creation");
                return Ok(MigrationOutcome::Skipped);
            }
            SchemaState::Current => return Ok(MigrationOutcome::Current),
            SchemaState::Absent => MigrationOutcome::Created,
            SchemaState::Partial { missing } => MigrationOutcome::Repaired { missing },
        };

        let mut tx = connection.begin().await.map_err(storage_error)?;
        (&mut *tx)
            .execute(schema::create_all(&self.schema).as_str())
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;

        let verified = schema::introspect(connection, &self.schema, &self.descriptor).await?;
        match self.descriptor.classify(&verified) {
            SchemaState::Current => Ok(outcome),
            state => Err(StorageError::Storage(format!(
                "schema '{}' is not current after migration: {state:?}",
                self.schema
            ))),
        }
    }
}
