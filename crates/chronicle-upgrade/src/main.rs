use clap::Parser;
use tracing_subscriber::EnvFilter;

use chronicle_upgrade::Args;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(schema = %args.schema, from = args.from_sequence_number, "Starting primitive event upgrade");

    match chronicle_upgrade::run(&args).await {
        Ok(report) => {
            tracing::info!(
                inserted = report.inserted,
                skipped = report.skipped,
                cut_over = report.cut_over,
                "Upgrade complete"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Upgrade failed");
            Err(e.into())
        }
    }
}
