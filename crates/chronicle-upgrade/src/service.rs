//! Offline upgrade of a legacy primitive event table.
//!
//! The upgrade runs in three phases. [`UpgradeService::prepare`] builds the
//! shadow table and a backup under the upgrade lock,
//! [`UpgradeService::copy`] streams legacy rows into the shadow table, and
//! [`UpgradeService::cut_over`] swaps the shadow table in. Copying commits
//! row by row and skips rows already present, so an interrupted run can be
//! repeated from the start or from a later sequence number. Rows the legacy
//! sequencer had not numbered yet are copied unsequenced and are numbered
//! by the current sequencer after cutover.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use chronicle_core::config::validate_identifier;
use chronicle_core::error::StorageError;
use chronicle_storage::lock::AdvisoryLock;
use chronicle_storage::schema::{self, BACKUP_TABLE, PRIMITIVE_EVENT_TABLE, SchemaDescriptor};
use sqlx::{Connection as _, Executor, FromRow, PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::envelope::{EventEnvelope, LegacyEventEnvelope};
use crate::error::UpgradeError;

/// Advisory lock resource, qualified by schema name.
pub const UPGRADE_RESOURCE: &str = "primitive-event-upgrade";
/// Source rows read per query.
pub const BATCH_SIZE: i64 = 1000;

/// Commit-date columns of the legacy layouts, newest first.
const LEGACY_DATE_COLUMNS: [&str; 2] = ["date_registered", "date_committed"];

/// Outcome of a complete upgrade run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub inserted: u64,
    pub skipped: u64,
    pub cut_over: bool,
}

/// Result of the preparation phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preparation {
    /// The shadow table is in place; rows can be copied.
    Ready(LegacySource),
    /// The live table already has the current layout.
    AlreadyUpgraded,
}

/// The legacy table layout found during preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySource {
    date_column: &'static str,
}

impl LegacySource {
    /// Column holding the commit timestamp of each legacy row.
    #[must_use]
    pub fn date_column(&self) -> &'static str {
        self.date_column
    }
}

#[derive(Debug, FromRow)]
struct LegacyRow {
    id: Uuid,
    correlation_id: Option<Uuid>,
    event_id: Uuid,
    event_type_id: Uuid,
    event_type: String,
    version: i32,
    sequence_number: Option<i64>,
    recorded_at: NaiveDateTime,
    envelope: Vec<u8>,
}

#[derive(Debug)]
struct UpgradedRow {
    row: LegacyRow,
    recorded_at: DateTime<Utc>,
    envelope: Vec<u8>,
}

/// Copy statements, built once per run.
struct Statements {
    select_sequenced: String,
    select_unsequenced: String,
    exists: String,
    insert: String,
}

#[derive(Debug, Clone)]
pub struct UpgradeService {
    pool: PgPool,
    lock: AdvisoryLock,
    schema: String,
    shadow: String,
    from_sequence_number: i64,
    batch_size: i64,
}

impl UpgradeService {
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` if `schema` is not a valid
    /// identifier or `from_sequence_number` is below 1.
    pub fn new(
        pool: PgPool,
        schema: &str,
        from_sequence_number: i64,
        lock_timeout: Duration,
    ) -> Result<Self, UpgradeError> {
        validate_identifier(schema)?;
        if from_sequence_number < 1 {
            return Err(StorageError::Configuration(format!(
                "from sequence number must be at least 1, got {from_sequence_number}"
            ))
            .into());
        }

        Ok(Self {
            lock: AdvisoryLock::new(pool.clone(), lock_timeout),
            pool,
            schema: schema.to_owned(),
            shadow: schema::upgrade_schema(schema),
            from_sequence_number,
            batch_size: BATCH_SIZE,
        })
    }

    /// Overrides the number of source rows read per query.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Runs every phase.
    ///
    /// # Errors
    ///
    /// Returns the first error of any phase. A failure while copying leaves
    /// the live table untouched.
    #[tracing::instrument(skip(self), fields(schema = %self.schema))]
    pub async fn run(&self) -> Result<UpgradeReport, UpgradeError> {
        let Preparation::Ready(source) = self.prepare().await? else {
            info!("primitive event table is already upgraded");
            return Ok(UpgradeReport::default());
        };

        let (inserted, skipped) = self.copy(&source).await?;
        let cut_over = self.cut_over().await?;

        let report = UpgradeReport {
            inserted,
            skipped,
            cut_over,
        };
        info!(?report, "upgrade finished");
        Ok(report)
    }

    /// Creates the shadow table, the backup and any missing companion
    /// tables.
    ///
    /// # Errors
    ///
    /// Returns [`UpgradeError::NothingToUpgrade`] if the schema has no
    /// primitive event table, or the lock or database error.
    pub async fn prepare(&self) -> Result<Preparation, UpgradeError> {
        let mut guard = self.lock.acquire(&self.resource()).await?;
        let outcome = match guard.connection() {
            Ok(connection) => self.prepare_locked(connection).await,
            Err(e) => Err(e.into()),
        };
        let released = guard.release().await;
        let preparation = outcome?;
        released?;
        Ok(preparation)
    }

    async fn prepare_locked(&self, connection: &mut PgConnection) -> Result<Preparation, UpgradeError> {
        let live = schema::introspect(connection, &self.schema, &SchemaDescriptor::current()).await?;
        if !live.has_table(PRIMITIVE_EVENT_TABLE) {
            return Err(UpgradeError::NothingToUpgrade(self.schema.clone()));
        }
        let Some(date_column) = LEGACY_DATE_COLUMNS
            .into_iter()
            .find(|column| live.column(PRIMITIVE_EVENT_TABLE, column).is_some())
        else {
            return Ok(Preparation::AlreadyUpgraded);
        };

        let mut tx = connection.begin().await?;
        let ddl = [
            schema::create_event_type_table(&self.schema),
            schema::create_id_key_table(&self.schema),
            schema::create_schema(&self.shadow),
            schema::create_primitive_event_table(&self.shadow),
        ]
        .concat();
        (&mut *tx).execute(ddl.as_str()).await?;
        self.refresh_backup(&mut tx).await?;
        tx.commit().await?;

        info!(shadow = %self.shadow, date_column, "upgrade prepared");
        Ok(Preparation::Ready(LegacySource { date_column }))
    }

    async fn refresh_backup(&self, connection: &mut PgConnection) -> Result<(), UpgradeError> {
        let source = format!("{}.{PRIMITIVE_EVENT_TABLE}", self.schema);
        let backup = format!("{}.{BACKUP_TABLE}", self.schema);

        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(&backup)
            .fetch_one(&mut *connection)
            .await?;
        if !exists {
            let create = format!("CREATE TABLE {backup} AS TABLE {source};");
            (&mut *connection).execute(create.as_str()).await?;
            info!(%backup, "backup created");
            return Ok(());
        }

        let compare = format!(
            "SELECT (SELECT MAX(sequence_number) FROM {backup}) \
             IS NOT DISTINCT FROM (SELECT MAX(sequence_number) FROM {source}) \
             AND (SELECT COUNT(*) FROM {backup}) = (SELECT COUNT(*) FROM {source})"
        );
        let in_step: bool = sqlx::query_scalar(&compare).fetch_one(&mut *connection).await?;
        if !in_step {
            let refresh = format!("TRUNCATE {backup}; INSERT INTO {backup} SELECT * FROM {source};");
            (&mut *connection).execute(refresh.as_str()).await?;
            info!(%backup, "backup refreshed");
        }
        Ok(())
    }

    /// Copies legacy rows into the shadow table, returning
    /// `(inserted, skipped)`. Numbered rows are copied in sequence order from
    /// the configured sequence number, then every unnumbered row follows in
    /// (commit date, version) order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::EnvelopeDecode` for the first row of a batch
    /// whose envelope cannot be read. Nothing from that batch is written.
    pub async fn copy(&self, source: &LegacySource) -> Result<(u64, u64), UpgradeError> {
        let statements = self.statements(source);
        let mut after = self.from_sequence_number - 1;
        let mut totals = (0_u64, 0_u64);

        loop {
            let rows: Vec<LegacyRow> = sqlx::query_as(&statements.select_sequenced)
                .bind(after)
                .bind(self.batch_size)
                .fetch_all(&self.pool)
                .await?;
            let Some(last) = rows.last() else {
                break;
            };
            after = last.sequence_number.unwrap_or(after);

            self.write_batch(&statements, rows, &mut totals).await?;
            info!(processed = totals.0 + totals.1, last_sequence_number = after, "processed events");
        }

        let mut offset = 0_i64;
        loop {
            let rows: Vec<LegacyRow> = sqlx::query_as(&statements.select_unsequenced)
                .bind(self.batch_size)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
            if rows.is_empty() {
                break;
            }
            offset += i64::try_from(rows.len()).unwrap_or(i64::MAX);

            self.write_batch(&statements, rows, &mut totals).await?;
            info!(processed = totals.0 + totals.1, unsequenced = offset, "processed events");
        }

        Ok(totals)
    }

    /// Decodes the whole batch before writing any of it.
    async fn write_batch(
        &self,
        statements: &Statements,
        rows: Vec<LegacyRow>,
        totals: &mut (u64, u64),
    ) -> Result<(), UpgradeError> {
        let batch = rows
            .into_iter()
            .map(upgrade_row)
            .collect::<Result<Vec<_>, _>>()?;
        for upgraded in &batch {
            if self.write(statements, upgraded).await? {
                totals.0 += 1;
            } else {
                totals.1 += 1;
            }
        }
        Ok(())
    }

    async fn write(&self, statements: &Statements, upgraded: &UpgradedRow) -> Result<bool, UpgradeError> {
        let row = &upgraded.row;
        let exists: bool = sqlx::query_scalar(&statements.exists)
            .bind(row.id)
            .bind(row.version)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            info!(
                id = %row.id,
                version = row.version,
                event_type = %row.event_type,
                sequence_number = ?row.sequence_number,
                "skipped"
            );
            return Ok(false);
        }

        sqlx::query(&statements.insert)
            .bind(row.id)
            .bind(row.version)
            .bind(row.correlation_id)
            .bind(&upgraded.envelope)
            .bind(row.event_id)
            .bind(row.event_type_id)
            .bind(row.sequence_number)
            .bind(upgraded.recorded_at)
            .execute(&self.pool)
            .await?;
        info!(
            id = %row.id,
            version = row.version,
            event_type = %row.event_type,
            sequence_number = ?row.sequence_number,
            "inserted"
        );
        Ok(true)
    }

    /// Replaces the live table with the shadow table and applies the
    /// remaining defaults, constraints and indexes. Returns `false` when
    /// there is no shadow table to move.
    ///
    /// # Errors
    ///
    /// Returns the lock or database error. The transaction is rolled back
    /// and the live table is left as it was.
    pub async fn cut_over(&self) -> Result<bool, UpgradeError> {
        let mut guard = self.lock.acquire(&self.resource()).await?;
        let outcome = match guard.connection() {
            Ok(connection) => self.cut_over_locked(connection).await,
            Err(e) => Err(e.into()),
        };
        let released = guard.release().await;
        let cut_over = outcome?;
        released?;
        Ok(cut_over)
    }

    async fn cut_over_locked(&self, connection: &mut PgConnection) -> Result<bool, UpgradeError> {
        let shadow_table = format!("{}.{PRIMITIVE_EVENT_TABLE}", self.shadow);
        let mut tx = connection.begin().await?;

        let shadow_exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(&shadow_table)
            .fetch_one(&mut *tx)
            .await?;
        if !shadow_exists {
            return Ok(false);
        }

        let swap = format!(
            "DROP TABLE IF EXISTS {schema}.{PRIMITIVE_EVENT_TABLE}; \
             ALTER TABLE {shadow_table} SET SCHEMA {schema}; \
             DROP SCHEMA {shadow};",
            schema = self.schema,
            shadow = self.shadow,
        );
        (&mut *tx).execute(swap.as_str()).await?;
        (&mut *tx)
            .execute(schema::finish_primitive_event_table(&self.schema).as_str())
            .await?;
        tx.commit().await?;

        info!(schema = %self.schema, "cut over to upgraded primitive event table");
        Ok(true)
    }

    fn resource(&self) -> String {
        format!("{}.{UPGRADE_RESOURCE}", self.schema)
    }

    fn statements(&self, source: &LegacySource) -> Statements {
        let schema = &self.schema;
        let shadow = &self.shadow;
        let date_column = source.date_column;
        let columns = format!(
            r"
SELECT pe.id, pe.correlation_id, pe.event_id, pe.event_type_id,
       COALESCE(et.type_name, '') AS event_type, pe.version,
       pe.sequence_number, pe.{date_column} AS recorded_at, pe.envelope
FROM {schema}.{PRIMITIVE_EVENT_TABLE} pe
LEFT JOIN {schema}.event_type et ON et.id = pe.event_type_id"
        );
        Statements {
            select_sequenced: format!(
                r"{columns}
WHERE pe.sequence_number > $1
ORDER BY pe.sequence_number
LIMIT $2
"
            ),
            select_unsequenced: format!(
                r"{columns}
WHERE pe.sequence_number IS NULL
ORDER BY pe.{date_column}, pe.version, pe.id
LIMIT $1 OFFSET $2
"
            ),
            exists: format!(
                "SELECT EXISTS (SELECT 1 FROM {shadow}.{PRIMITIVE_EVENT_TABLE} WHERE id = $1 AND version = $2)"
            ),
            insert: format!(
                r"
INSERT INTO {shadow}.{PRIMITIVE_EVENT_TABLE}
    (id, version, correlation_id, envelope, event_id, event_type_id, sequence_number, recorded_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"
            ),
        }
    }
}

fn upgrade_row(row: LegacyRow) -> Result<UpgradedRow, UpgradeError> {
    let recorded_at = row.recorded_at.and_utc();
    let legacy = LegacyEventEnvelope::from_slice(&row.envelope).map_err(|e| StorageError::EnvelopeDecode {
        id: row.id,
        version: row.version,
        sequence_number: row.sequence_number,
        reason: e.to_string(),
    })?;
    let envelope = EventEnvelope::from_legacy(legacy, recorded_at, row.event_id).to_vec()?;
    Ok(UpgradedRow {
        row,
        recorded_at,
        envelope,
    })
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;

    use super::*;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_schema_is_rejected() {
        let result = UpgradeService::new(lazy_pool(), "bad schema;", 1, Duration::from_secs(1));

        assert!(matches!(
            result,
            Err(UpgradeError::Storage(StorageError::Configuration(_)))
        ));
    }

    #[tokio::test]
    async fn test_from_sequence_number_below_one_is_rejected() {
        let result = UpgradeService::new(lazy_pool(), "dbo", 0, Duration::from_secs(1));

        assert!(matches!(
            result,
            Err(UpgradeError::Storage(StorageError::Configuration(_)))
        ));
    }

    #[tokio::test]
    async fn test_copy_statements_target_the_shadow_schema() {
        let service = UpgradeService::new(lazy_pool(), "ledger", 1, Duration::from_secs(1)).unwrap();

        let statements = service.statements(&LegacySource {
            date_column: "date_committed",
        });

        assert!(statements.select_sequenced.contains("pe.date_committed AS recorded_at"));
        assert!(statements.select_sequenced.contains("FROM ledger.primitive_event pe"));
        assert!(statements.select_unsequenced.contains("WHERE pe.sequence_number IS NULL"));
        assert!(
            statements
                .select_unsequenced
                .contains("ORDER BY pe.date_committed, pe.version, pe.id")
        );
        assert!(statements.exists.contains("ledger_upgrade.primitive_event"));
        assert!(statements.insert.contains("INSERT INTO ledger_upgrade.primitive_event"));
    }

    #[test]
    fn test_undecodable_envelope_names_the_row() {
        let row = LegacyRow {
            id: Uuid::new_v4(),
            correlation_id: None,
            event_id: Uuid::new_v4(),
            event_type_id: Uuid::new_v4(),
            event_type: "OrderPlaced".into(),
            version: 1,
            sequence_number: Some(42),
            recorded_at: NaiveDateTime::default(),
            envelope: b"{not json".to_vec(),
        };
        let id = row.id;

        let result = upgrade_row(row);

        assert!(matches!(
            result,
            Err(UpgradeError::Storage(StorageError::EnvelopeDecode { id: failed, sequence_number: Some(42), .. }))
                if failed == id
        ));
    }

    #[test]
    fn test_undecodable_unsequenced_envelope_has_no_sequence_number() {
        let row = LegacyRow {
            id: Uuid::new_v4(),
            correlation_id: None,
            event_id: Uuid::new_v4(),
            event_type_id: Uuid::new_v4(),
            event_type: "OrderPlaced".into(),
            version: 7,
            sequence_number: None,
            recorded_at: NaiveDateTime::default(),
            envelope: b"\x00\x01".to_vec(),
        };

        let result = upgrade_row(row);

        assert!(matches!(
            result,
            Err(UpgradeError::Storage(StorageError::EnvelopeDecode { version: 7, sequence_number: None, .. }))
        ));
    }
}
