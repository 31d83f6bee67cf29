//! `modscan` -- operator CLI for the modscan scan coordinator.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use modscan_cli::cli::{Cli, Commands};

/// Default log level; stdout carries command output, logs go to stderr.
const DEFAULT_LOG_LEVEL: &str = "warn";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // sandbox stderr ends up in the parent's error messages
    let default_level = match cli.command {
        Commands::Sandbox(_) => "error",
        _ => DEFAULT_LOG_LEVEL,
    };
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = modscan_cli::run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
