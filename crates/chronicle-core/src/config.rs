//! Storage configuration.
//!
//! `StorageOptions` is validated once when it is built and is immutable
//! afterwards. Components receive it by reference or clone it.

use std::time::Duration;

use crate::error::StorageError;

/// Default schema that holds the event tables.
pub const DEFAULT_SCHEMA: &str = "dbo";
/// Default number of rows numbered per sequencer run.
pub const DEFAULT_SEQUENCER_BATCH_SIZE: u32 = 100;
/// Default statement timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bounded wait for cross-process locks.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Validated, immutable storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    connection_string: String,
    schema: String,
    configure_database: bool,
    command_timeout: Duration,
    sequencer_batch_size: u32,
    lock_timeout: Duration,
}

impl StorageOptions {
    /// Starts a builder for the given connection string.
    #[must_use]
    pub fn builder(connection_string: impl Into<String>) -> StorageOptionsBuilder {
        StorageOptionsBuilder::new(connection_string)
    }

    /// Reads the configuration from environment variables.
    ///
    /// `DATABASE_URL` is required. Optional: `CHRONICLE_SCHEMA`,
    /// `CHRONICLE_CONFIGURE_DATABASE`, `CHRONICLE_COMMAND_TIMEOUT_SECS`,
    /// `CHRONICLE_SEQUENCER_BATCH_SIZE` and `CHRONICLE_LOCK_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` if a variable is missing or
    /// cannot be parsed, or if the resulting options are invalid.
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds options from an arbitrary key lookup (see [`Self::from_env`]).
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection_string = lookup("DATABASE_URL").ok_or_else(|| {
            StorageError::Configuration("DATABASE_URL environment variable must be set".into())
        })?;
        let mut builder = StorageOptionsBuilder::new(connection_string);

        if let Some(schema) = lookup("CHRONICLE_SCHEMA") {
            builder = builder.schema(schema);
        }
        if let Some(value) = lookup("CHRONICLE_CONFIGURE_DATABASE") {
            builder = builder.configure_database(parse_bool("CHRONICLE_CONFIGURE_DATABASE", &value)?);
        }
        if let Some(value) = lookup("CHRONICLE_COMMAND_TIMEOUT_SECS") {
            builder = builder.command_timeout(Duration::from_secs(parse_number(
                "CHRONICLE_COMMAND_TIMEOUT_SECS",
                &value,
            )?));
        }
        if let Some(value) = lookup("CHRONICLE_SEQUENCER_BATCH_SIZE") {
            let batch_size: i64 = parse_number("CHRONICLE_SEQUENCER_BATCH_SIZE", &value)?;
            builder = builder.sequencer_batch_size(batch_size);
        }
        if let Some(value) = lookup("CHRONICLE_LOCK_TIMEOUT_SECS") {
            builder = builder.lock_timeout(Duration::from_secs(parse_number(
                "CHRONICLE_LOCK_TIMEOUT_SECS",
                &value,
            )?));
        }

        builder.build()
    }

    /// Connection string of the backing database.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Schema that holds the event tables.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Whether schema objects are created at startup.
    #[must_use]
    pub fn configure_database(&self) -> bool {
        self.configure_database
    }

    /// Statement timeout applied to every connection.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Maximum rows numbered per sequencer run, at least 1.
    #[must_use]
    pub fn sequencer_batch_size(&self) -> u32 {
        self.sequencer_batch_size
    }

    /// Bounded wait for cross-process locks.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

/// Builder for [`StorageOptions`].
#[derive(Debug, Clone)]
pub struct StorageOptionsBuilder {
    connection_string: String,
    schema: String,
    configure_database: bool,
    command_timeout: Duration,
    sequencer_batch_size: i64,
    lock_timeout: Duration,
}

impl StorageOptionsBuilder {
    fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            schema: DEFAULT_SCHEMA.to_owned(),
            configure_database: true,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            sequencer_batch_size: i64::from(DEFAULT_SEQUENCER_BATCH_SIZE),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    #[must_use]
    pub fn configure_database(mut self, configure_database: bool) -> Self {
        self.configure_database = configure_database;
        self
    }

    #[must_use]
    pub fn command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    /// Sets the sequencer batch size. Values below 1 are clamped to 1.
    #[must_use]
    pub fn sequencer_batch_size(mut self, batch_size: i64) -> Self {
        self.sequencer_batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Validates and freezes the options.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` if the connection string is
    /// blank, the schema is not a plain SQL identifier, or a timeout is zero.
    pub fn build(self) -> Result<StorageOptions, StorageError> {
        if self.connection_string.trim().is_empty() {
            return Err(StorageError::Configuration(
                "a connection string is required".into(),
            ));
        }
        validate_identifier(&self.schema)?;
        if self.command_timeout.is_zero() {
            return Err(StorageError::Configuration(
                "command timeout must be greater than zero".into(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(StorageError::Configuration(
                "lock timeout must be greater than zero".into(),
            ));
        }

        let sequencer_batch_size =
            u32::try_from(self.sequencer_batch_size.max(1)).unwrap_or(u32::MAX);

        Ok(StorageOptions {
            connection_string: self.connection_string,
            schema: self.schema,
            configure_database: self.configure_database,
            command_timeout: self.command_timeout,
            sequencer_batch_size,
            lock_timeout: self.lock_timeout,
        })
    }
}

/// Checks that `name` can be interpolated into SQL as an unquoted identifier.
///
/// Schema names come from configuration and end up in DDL and queries, so
/// only `[A-Za-z_][A-Za-z0-9_]*` up to 63 bytes is accepted.
///
/// # Errors
///
/// Returns `StorageError::Configuration` if the name is not acceptable.
pub fn validate_identifier(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(StorageError::Configuration(format!(
            "'{name}' is not a valid schema name"
        )))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, StorageError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StorageError::Configuration(format!(
            "{key} must be a boolean, got '{value}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, StorageError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| StorageError::Configuration(format!("{key} must be a number: {e}")))
}
