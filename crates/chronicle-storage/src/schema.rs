//! Primitive event log database schema.
//!
//! All statements are parameterised by the schema name, which is validated
//! as an identifier before it is ever interpolated. Creation statements are
//! idempotent so they can repair a partially created schema.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chronicle_core::error::StorageError;
use sha2::{Digest, Sha256};
use sqlx::PgConnection;

use crate::error::storage_error;

pub const PRIMITIVE_EVENT_TABLE: &str = "primitive_event";
pub const EVENT_TYPE_TABLE: &str = "event_type";
pub const ID_KEY_TABLE: &str = "id_key";
pub const BACKUP_TABLE: &str = "primitive_event_backup";

/// Name of the shadow schema the offline upgrade builds into.
#[must_use]
pub fn upgrade_schema(schema: &str) -> String {
    format!("{schema}_upgrade")
}

// --- DDL ---

#[must_use]
pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {schema};")
}

#[must_use]
pub fn create_event_type_table(schema: &str) -> String {
    format!(
        r"
CREATE TABLE IF NOT EXISTS {schema}.event_type (
    id        UUID NOT NULL,
    type_name VARCHAR(1024) NOT NULL,
    CONSTRAINT pk_event_type PRIMARY KEY (id)
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_event_type_type_name
    ON {schema}.event_type (lower(type_name));
"
    )
}

#[must_use]
pub fn create_id_key_table(schema: &str) -> String {
    format!(
        r"
CREATE TABLE IF NOT EXISTS {schema}.id_key (
    unique_key VARCHAR(450) NOT NULL,
    id         UUID NOT NULL,
    CONSTRAINT pk_id_key PRIMARY KEY (unique_key)
);

CREATE INDEX IF NOT EXISTS ix_id_key_id
    ON {schema}.id_key (id);
"
    )
}

/// The primitive event table without its default, foreign key or secondary
/// indexes. The upgrade tool bulk-loads rows into this shape and then
/// applies [`finish_primitive_event_table`].
#[must_use]
pub fn create_primitive_event_table(schema: &str) -> String {
    format!(
        r"
CREATE TABLE IF NOT EXISTS {schema}.primitive_event (
    id              UUID NOT NULL,
    version         INTEGER NOT NULL,
    correlation_id  UUID NULL,
    envelope        BYTEA NOT NULL,
    event_id        UUID NOT NULL,
    event_type_id   UUID NOT NULL,
    sequence_number BIGINT NULL,
    recorded_at     TIMESTAMPTZ NOT NULL,
    CONSTRAINT pk_primitive_event PRIMARY KEY (id, version)
);
"
    )
}

/// Default, foreign key and secondary indexes of the primitive event table.
#[must_use]
pub fn finish_primitive_event_table(schema: &str) -> String {
    format!(
        r"
ALTER TABLE {schema}.primitive_event
    ALTER COLUMN recorded_at SET DEFAULT now();

DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint
        WHERE conname = 'fk_primitive_event_event_type'
          AND connamespace = '{schema}'::regnamespace
    ) THEN
        ALTER TABLE {schema}.primitive_event
            ADD CONSTRAINT fk_primitive_event_event_type
            FOREIGN KEY (event_type_id) REFERENCES {schema}.event_type (id)
            ON DELETE CASCADE;
    END IF;
END $$;

CREATE INDEX IF NOT EXISTS ix_primitive_event_event_type_id
    ON {schema}.primitive_event (event_type_id);

CREATE UNIQUE INDEX IF NOT EXISTS ux_primitive_event_sequence_number
    ON {schema}.primitive_event (sequence_number, recorded_at)
    WHERE sequence_number IS NOT NULL;

CREATE INDEX IF NOT EXISTS ix_primitive_event_unsequenced
    ON {schema}.primitive_event (recorded_at, version)
    WHERE sequence_number IS NULL;
"
    )
}

/// Every statement needed to bring `schema` to the current shape.
#[must_use]
pub fn create_all(schema: &str) -> String {
    [
        create_schema(schema),
        create_event_type_table(schema),
        create_id_key_table(schema),
        create_primitive_event_table(schema),
        finish_primitive_event_table(schema),
    ]
    .concat()
}

// --- descriptor ---

/// Expected shape of one column as reported by `information_schema`.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDescriptor {
    pub name: &'static str,
    pub data_type: &'static str,
    pub nullable: bool,
}

const fn column(name: &'static str, data_type: &'static str, nullable: bool) -> ColumnDescriptor {
    ColumnDescriptor {
        name,
        data_type,
        nullable,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableDescriptor {
    pub name: &'static str,
    pub columns: &'static [ColumnDescriptor],
}

/// A feature whose presence means the live schema predates the current
/// layout and needs the offline upgrade.
#[derive(Debug, Clone, Copy)]
pub enum LegacyMarker {
    /// The column is server-generated (identity or serial).
    GeneratedColumn { table: &'static str, column: &'static str },
    /// The column no longer exists in the current layout.
    Column { table: &'static str, column: &'static str },
    /// The index no longer exists in the current layout.
    Index(&'static str),
}

/// Version 1 of the primitive event log layout.
#[derive(Debug, Clone, Copy)]
pub struct SchemaDescriptor {
    pub version: u32,
    pub tables: &'static [TableDescriptor],
    /// Index and constraint names.
    pub objects: &'static [&'static str],
    pub legacy_markers: &'static [LegacyMarker],
}

const TABLES: &[TableDescriptor] = &[
    TableDescriptor {
        name: EVENT_TYPE_TABLE,
        columns: &[
            column("id", "uuid", false),
            column("type_name", "character varying", false),
        ],
    },
    TableDescriptor {
        name: ID_KEY_TABLE,
        columns: &[
            column("unique_key", "character varying", false),
            column("id", "uuid", false),
        ],
    },
    TableDescriptor {
        name: PRIMITIVE_EVENT_TABLE,
        columns: &[
            column("id", "uuid", false),
            column("version", "integer", false),
            column("correlation_id", "uuid", true),
            column("envelope", "bytea", false),
            column("event_id", "uuid", false),
            column("event_type_id", "uuid", false),
            column("sequence_number", "bigint", true),
            column("recorded_at", "timestamp with time zone", false),
        ],
    },
];

const OBJECTS: &[&str] = &[
    "pk_event_type",
    "ux_event_type_type_name",
    "pk_id_key",
    "ix_id_key_id",
    "pk_primitive_event",
    "fk_primitive_event_event_type",
    "ix_primitive_event_event_type_id",
    "ux_primitive_event_sequence_number",
    "ix_primitive_event_unsequenced",
];

const LEGACY_MARKERS: &[LegacyMarker] = &[
    LegacyMarker::GeneratedColumn {
        table: PRIMITIVE_EVENT_TABLE,
        column: "sequence_number",
    },
    LegacyMarker::Column {
        table: PRIMITIVE_EVENT_TABLE,
        column: "date_registered",
    },
    LegacyMarker::Column {
        table: PRIMITIVE_EVENT_TABLE,
        column: "date_committed",
    },
    LegacyMarker::Index("ix_primitive_event_date_committed_filtered_null"),
];

impl SchemaDescriptor {
    #[must_use]
    pub const fn current() -> Self {
        Self {
            version: 1,
            tables: TABLES,
            objects: OBJECTS,
            legacy_markers: LEGACY_MARKERS,
        }
    }

    fn table_names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }

    /// The fingerprint a fully migrated schema produces.
    #[must_use]
    pub fn expected_fingerprint(&self) -> SchemaFingerprint {
        let mut fingerprint = SchemaFingerprint::default();
        for table in self.tables {
            for c in table.columns {
                fingerprint.add_column(
                    table.name,
                    LiveColumn {
                        name: c.name.to_owned(),
                        data_type: c.data_type.to_owned(),
                        nullable: c.nullable,
                        generated: false,
                    },
                );
            }
        }
        for object in self.objects {
            fingerprint.add_object(object);
        }
        fingerprint
    }

    /// Compares a live fingerprint against this layout.
    #[must_use]
    pub fn classify(&self, live: &SchemaFingerprint) -> SchemaState {
        if live.tables.is_empty() {
            return SchemaState::Absent;
        }
        if live.digest() == self.expected_fingerprint().digest() {
            return SchemaState::Current;
        }

        let mut reasons = Vec::new();
        for marker in self.legacy_markers {
            match *marker {
                LegacyMarker::GeneratedColumn { table, column } => {
                    if live.column(table, column).is_some_and(|c| c.generated) {
                        reasons.push(format!("{table}.{column} is server-generated"));
                    }
                }
                LegacyMarker::Column { table, column } => {
                    if live.column(table, column).is_some() {
                        reasons.push(format!("{table}.{column} is a legacy column"));
                    }
                }
                LegacyMarker::Index(name) => {
                    if live.objects.contains(name) {
                        reasons.push(format!("legacy index {name} exists"));
                    }
                }
            }
        }

        let mut missing = Vec::new();
        for table in self.tables {
            let Some(columns) = live.tables.get(table.name) else {
                missing.push(format!("table {}", table.name));
                continue;
            };
            for expected in table.columns {
                match columns.get(expected.name) {
                    None => reasons.push(format!("{}.{} is missing", table.name, expected.name)),
                    Some(c) if c.data_type != expected.data_type => reasons.push(format!(
                        "{}.{} has type {}, expected {}",
                        table.name, expected.name, c.data_type, expected.data_type
                    )),
                    Some(c) if c.nullable != expected.nullable => reasons.push(format!(
                        "{}.{} nullability differs",
                        table.name, expected.name
                    )),
                    Some(_) => {}
                }
            }
        }

        if !reasons.is_empty() {
            reasons.dedup();
            return SchemaState::Stale { reasons };
        }

        missing.extend(
            self.objects
                .iter()
                .filter(|o| !live.objects.contains(**o))
                .map(|o| format!("object {o}")),
        );

        if missing.is_empty() {
            SchemaState::Current
        } else {
            SchemaState::Partial { missing }
        }
    }
}

/// Result of comparing the live schema to the expected layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaState {
    /// None of the managed tables exist.
    Absent,
    /// Some tables, indexes or constraints are missing; creation is safe.
    Partial { missing: Vec<String> },
    Current,
    /// The schema has a legacy or drifted shape that creation cannot fix.
    Stale { reasons: Vec<String> },
}

// --- fingerprint ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub generated: bool,
}

/// Structural snapshot of the managed tables in one schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaFingerprint {
    tables: BTreeMap<String, BTreeMap<String, LiveColumn>>,
    objects: BTreeSet<String>,
}

impl SchemaFingerprint {
    pub fn add_column(&mut self, table: &str, column: LiveColumn) {
        self.tables
            .entry(table.to_owned())
            .or_default()
            .insert(column.name.clone(), column);
    }

    pub fn add_object(&mut self, name: &str) {
        self.objects.insert(name.to_owned());
    }

    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    #[must_use]
    pub fn column(&self, table: &str, column: &str) -> Option<&LiveColumn> {
        self.tables.get(table).and_then(|c| c.get(column))
    }

    /// Hex SHA-256 over a canonical rendering of the snapshot.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut canonical = String::new();
        for (table, columns) in &self.tables {
            for c in columns.values() {
                let _ = writeln!(
                    canonical,
                    "{table}.{}:{}:{}:{}",
                    c.name, c.data_type, c.nullable, c.generated
                );
            }
        }
        for object in &self.objects {
            let _ = writeln!(canonical, "object:{object}");
        }

        Sha256::digest(canonical.as_bytes())
            .iter()
            .fold(String::with_capacity(64), |mut hex, byte| {
                let _ = write!(hex, "{byte:02x}");
                hex
            })
    }
}

#[derive(sqlx::FromRow)]
struct ColumnRow {
    table_name: String,
    column_name: String,
    data_type: String,
    is_nullable: String,
    is_identity: String,
    column_default: Option<String>,
}

/// Reads the structure of the managed tables in `schema`.
///
/// # Errors
///
/// Returns `StorageError::Storage` if the catalog queries fail.
pub async fn introspect(
    connection: &mut PgConnection,
    schema: &str,
    descriptor: &SchemaDescriptor,
) -> Result<SchemaFingerprint, StorageError> {
    let tables = descriptor.table_names();

    let columns: Vec<ColumnRow> = sqlx::query_as(
        r"
SELECT table_name::text, column_name::text, data_type::text,
       is_nullable::text, is_identity::text, column_default::text
FROM information_schema.columns
WHERE table_schema::text = $1 AND table_name::text = ANY($2)
",
    )
    .bind(schema)
    .bind(&tables)
    .fetch_all(&mut *connection)
    .await
    .map_err(storage_error)?;

    let objects: Vec<String> = sqlx::query_scalar(
        r"
SELECT indexname::text FROM pg_indexes
WHERE schemaname::text = $1 AND tablename::text = ANY($2)
UNION
SELECT constraint_name::text FROM information_schema.table_constraints
WHERE table_schema::text = $1 AND table_name::text = ANY($2)
  AND constraint_type = 'FOREIGN KEY'
",
    )
    .bind(schema)
    .bind(&tables)
    .fetch_all(&mut *connection)
    .await
    .map_err(storage_error)?;

    let mut fingerprint = SchemaFingerprint::default();
    for row in columns {
        let generated = row.is_identity == "YES"
            || row
                .column_default
                .as_deref()
                .is_some_and(|d| d.starts_with("nextval("));
        fingerprint.add_column(
            &row.table_name,
            LiveColumn {
                name: row.column_name,
                data_type: row.data_type,
                nullable: row.is_nullable == "YES",
                generated,
            },
        );
    }
    for object in &objects {
        fingerprint.add_object(object);
    }

    Ok(fingerprint)
}
