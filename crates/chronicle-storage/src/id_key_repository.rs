//! `PostgreSQL` implementation of the `IdKeyRepository` trait.

use async_trait::async_trait;
use chronicle_core::error::StorageError;
use chronicle_core::repository::IdKeyRepository;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{is_unique_violation, storage_error};

#[derive(Debug)]
struct Statements {
    insert: String,
    find: String,
    contains_key: String,
    contains_id: String,
    rekey: String,
    remove_key: String,
    remove_id: String,
}

impl Statements {
    fn new(schema: &str) -> Self {
        let table = format!("{schema}.id_key");
        Self {
            insert: format!("INSERT INTO {table} (unique_key, id) VALUES ($1, $2)"),
            find: format!("SELECT id FROM {table} WHERE unique_key = $1"),
            contains_key: format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE unique_key = $1)"),
            contains_id: format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)"),
            rekey: format!("UPDATE {table} SET unique_key = $2 WHERE unique_key = $1"),
            remove_key: format!("DELETE FROM {table} WHERE unique_key = $1"),
            remove_id: format!("DELETE FROM {table} WHERE id = $1"),
        }
    }
}

/// PostgreSQL-backed id-key index.
#[derive(Debug)]
pub struct PgIdKeyRepository {
    pool: PgPool,
    sql: Statements,
}

impl PgIdKeyRepository {
    /// Creates a new `PgIdKeyRepository` over the table in `schema`.
    #[must_use]
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            sql: Statements::new(schema),
        }
    }
}

#[async_trait]
impl IdKeyRepository for PgIdKeyRepository {
    #[tracing::instrument(skip(self))]
    async fn add(&self, id: Uuid, key: &str) -> Result<(), StorageError> {
        sqlx::query(&self.sql.insert)
            .bind(key)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::DuplicateKey(key.to_owned())
                } else {
                    storage_error(e)
                }
            })?;
        Ok(())
    }

    async fn find(&self, key: &str) -> Result<Option<Uuid>, StorageError> {
        sqlx::query_scalar(&self.sql.find)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn contains_key(&self, key: &str) -> Result<bool, StorageError> {
        sqlx::query_scalar(&self.sql.contains_key)
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn contains_id(&self, id: Uuid) -> Result<bool, StorageError> {
        sqlx::query_scalar(&self.sql.contains_id)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }

    #[tracing::instrument(skip(self))]
    async fn rekey(&self, key: &str, rekey: &str) -> Result<(), StorageError> {
        sqlx::query(&self.sql.rekey)
            .bind(key)
            .bind(rekey)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::DuplicateKey(rekey.to_owned())
                } else {
                    storage_error(e)
                }
            })?;
        Ok(())
    }

    async fn remove_key(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query(&self.sql.remove_key)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn remove_id(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query(&self.sql.remove_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}
