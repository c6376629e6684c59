//! Offline upgrade of a legacy primitive event log to the current layout.

pub mod cli;
pub mod envelope;
pub mod error;
pub mod service;

pub use cli::Args;
pub use error::UpgradeError;
pub use service::{UpgradeReport, UpgradeService};

use chronicle_core::config::StorageOptions;

/// Connects to the database named by `args` and runs the upgrade.
///
/// # Errors
///
/// Returns the connection error or the first failure of the upgrade.
pub async fn run(args: &Args) -> Result<UpgradeReport, UpgradeError> {
    let options = StorageOptions::builder(args.connection_string.clone())
        .schema(args.schema.clone())
        .configure_database(false)
        .lock_timeout(args.lock_timeout())
        .command_timeout(args.command_timeout())
        .build()?;
    let pool = chronicle_storage::connect_pool(&options).await?;

    UpgradeService::new(pool, options.schema(), args.from_sequence_number, options.lock_timeout())?
        .run()
        .await
}
