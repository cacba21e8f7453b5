//! workqueue CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments and settings first to get the log level
    let cli = workqueue::cli::parse_cli();
    let settings = cli.load_settings()?;

    // Priority: RUST_LOG env var > --log-level CLI arg > settings debug flag > "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_filter(&settings));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    workqueue::cli::run_with_cli(cli, settings).await
}
