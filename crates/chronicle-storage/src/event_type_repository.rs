//! `PostgreSQL` implementation of the `EventTypeRepository` trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chronicle_core::error::StorageError;
use chronicle_core::repository::EventTypeRepository;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::storage_error;

/// PostgreSQL-backed event type registry with a process-wide cache.
///
/// One async mutex serializes cache misses in this process; the unique index
/// on `lower(type_name)` decides races between processes.
#[derive(Debug)]
pub struct PgEventTypeRepository {
    pool: PgPool,
    cache: Mutex<HashMap<String, Uuid>>,
    insert_sql: String,
    select_sql: String,
}

impl PgEventTypeRepository {
    /// Creates a new `PgEventTypeRepository` over the tables in `schema`.
    #[must_use]
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            cache: Mutex::new(HashMap::new()),
            insert_sql: format!(
                "INSERT INTO {schema}.event_type (id, type_name) VALUES ($1, $2) \
                 ON CONFLICT ((lower(type_name))) DO NOTHING"
            ),
            select_sql: format!("SELECT id FROM {schema}.event_type WHERE lower(type_name) = lower($1)"),
        }
    }

    /// Number of names resolved so far by this instance.
    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[async_trait]
impl EventTypeRepository for PgEventTypeRepository {
    #[tracing::instrument(skip(self))]
    async fn id_for(&self, type_name: &str) -> Result<Uuid, StorageError> {
        let type_name = type_name.trim();
        if type_name.is_empty() {
            return Err(StorageError::InvalidEvent("event type name is empty".into()));
        }

        let key = type_name.to_lowercase();
        let mut cache = self.cache.lock().await;
        if let Some(id) = cache.get(&key) {
            return Ok(*id);
        }

        sqlx::query(&self.insert_sql)
            .bind(Uuid::new_v4())
            .bind(type_name)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        let id: Uuid = sqlx::query_scalar(&self.select_sql)
            .bind(type_name)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        tracing::debug!(%id, "event type resolved");
        cache.insert(key, id);
        Ok(id)
    }
}
