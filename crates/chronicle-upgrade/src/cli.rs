//! Command-line arguments of the upgrade binary.

use std::time::Duration;

use chronicle_core::config::{DEFAULT_LOCK_TIMEOUT, DEFAULT_SCHEMA, validate_identifier};
use clap::Parser;

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3600;

/// Upgrades a legacy primitive event table to the current layout.
///
/// The target database must be given explicitly; `DATABASE_URL` is not
/// consulted.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "chronicle-upgrade", version, about)]
pub struct Args {
    /// PostgreSQL connection string of the database to upgrade.
    #[arg(short = 'c', long, visible_alias = "cs")]
    pub connection_string: String,

    /// Schema that holds the primitive event tables.
    #[arg(short = 's', long, default_value = DEFAULT_SCHEMA, value_parser = parse_schema)]
    pub schema: String,

    /// First legacy sequence number to copy.
    #[arg(
        long,
        visible_alias = "fsn",
        default_value_t = 1,
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    pub from_sequence_number: i64,

    /// Seconds to wait for the upgrade lock.
    #[arg(
        long,
        default_value_t = DEFAULT_LOCK_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub lock_timeout_secs: u64,

    /// Statement timeout in seconds. Backing up a large table can take a
    /// while, so this is far longer than the library default.
    #[arg(
        long,
        default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub command_timeout_secs: u64,
}

impl Args {
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn parse_schema(raw: &str) -> Result<String, String> {
    validate_identifier(raw).map_err(|e| e.to_string())?;
    Ok(raw.to_owned())
}
