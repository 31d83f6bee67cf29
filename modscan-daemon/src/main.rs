mod cli;

use anyhow::Result;
use clap::Parser;

use modscan_core::config::ModscanConfig;
use modscan_daemon::daemon::Daemon;
use modscan_daemon::logging;

use crate::cli::DaemonCli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonCli::parse();

    let mut config = ModscanConfig::load(&args.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", args.config.display(), e))?;
    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if args.validate {
        println!("configuration is valid: {}", args.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        config = %args.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "modscan-daemon starting"
    );

    let mut daemon = Daemon::build_from_config(config).await?;
    daemon.run().await
}
