//! Connection pool construction and the component facade.

use std::str::FromStr;
use std::sync::Arc;

use chronicle_core::config::StorageOptions;
use chronicle_core::error::StorageError;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::error::storage_error;
use crate::event_type_repository::PgEventTypeRepository;
use crate::id_key_repository::PgIdKeyRepository;
use crate::lock::AdvisoryLock;
use crate::migrator::{MigrationOutcome, SchemaMigrator};
use crate::primitive_event_query::PgPrimitiveEventQuery;
use crate::primitive_event_repository::PgPrimitiveEventRepository;
use crate::sequencer::PgPrimitiveEventSequencer;

const MAX_CONNECTIONS: u32 = 10;

/// Builds a pool whose sessions enforce the configured command timeout.
///
/// # Errors
///
/// Returns `StorageError::Configuration` for an unparseable connection
/// string and `StorageError::Storage` if the database cannot be reached.
pub async fn connect_pool(options: &StorageOptions) -> Result<PgPool, StorageError> {
    let connect_options = PgConnectOptions::from_str(options.connection_string())
        .map_err(|e| StorageError::Configuration(format!("invalid connection string: {e}")))?
        .options([(
            "statement_timeout",
            options.command_timeout().as_millis().to_string(),
        )]);

    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(connect_options)
        .await
        .map_err(storage_error)
}

/// Every storage component, wired to one pool and one schema.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: PgPool,
    options: StorageOptions,
    migration: MigrationOutcome,
    event_types: Arc<PgEventTypeRepository>,
    id_keys: Arc<PgIdKeyRepository>,
    events: Arc<PgPrimitiveEventRepository>,
    query: Arc<PgPrimitiveEventQuery>,
    sequencer: Arc<PgPrimitiveEventSequencer>,
}

impl Storage {
    /// Connects, migrates the schema when configured, and wires every
    /// component.
    ///
    /// # Errors
    ///
    /// Returns any error from [`connect_pool`] or [`SchemaMigrator::run`].
    pub async fn connect(options: StorageOptions) -> Result<Self, StorageError> {
        let pool = connect_pool(&options).await?;
        Self::with_pool(pool, options).await
    }

    /// Like [`Self::connect`] over an existing pool. The connection string
    /// in `options` is not used.
    ///
    /// # Errors
    ///
    /// Returns any error from [`SchemaMigrator::run`].
    pub async fn with_pool(pool: PgPool, options: StorageOptions) -> Result<Self, StorageError> {
        let migration = SchemaMigrator::new(pool.clone(), &options).run().await?;

        let schema = options.schema();
        let event_types = Arc::new(PgEventTypeRepository::new(pool.clone(), schema));
        let id_keys = Arc::new(PgIdKeyRepository::new(pool.clone(), schema));
        let events = Arc::new(PgPrimitiveEventRepository::new(
            pool.clone(),
            schema,
            event_types.clone(),
        ));
        let query = Arc::new(PgPrimitiveEventQuery::new(
            pool.clone(),
            schema,
            event_types.clone(),
        ));
        let sequencer = Arc::new(PgPrimitiveEventSequencer::new(
            AdvisoryLock::new(pool.clone(), options.lock_timeout()),
            schema,
            options.sequencer_batch_size(),
        ));

        Ok(Self {
            pool,
            options,
            migration,
            event_types,
            id_keys,
            events,
            query,
            sequencer,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// What the startup migration did.
    #[must_use]
    pub fn migration(&self) -> &MigrationOutcome {
        &self.migration
    }

    #[must_use]
    pub fn event_types(&self) -> Arc<PgEventTypeRepository> {
        self.event_types.clone()
    }

    #[must_use]
    pub fn id_keys(&self) -> Arc<PgIdKeyRepository> {
        self.id_keys.clone()
    }

    #[must_use]
    pub fn events(&self) -> Arc<PgPrimitiveEventRepository> {
        self.events.clone()
    }

    #[must_use]
    pub fn query(&self) -> Arc<PgPrimitiveEventQuery> {
        self.query.clone()
    }

    #[must_use]
    pub fn sequencer(&self) -> Arc<PgPrimitiveEventSequencer> {
        self.sequencer.clone()
    }
}
