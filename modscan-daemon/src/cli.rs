//! Command-line flags for modscan-daemon.

use std::path::PathBuf;

use clap::Parser;

use modscan_core::config::ModscanConfig;

/// modscan scan coordination daemon.
///
/// Accepts vulncheck and analysis jobs over HTTP, runs them on a
/// bounded worker pool, and writes result rows to the warehouse.
#[derive(Parser, Debug)]
#[command(name = "modscan-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to modscan.toml configuration file.
    #[arg(short, long, default_value = "/etc/modscan/modscan.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the control surface address (`server.listen_addr`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Override the worker count (`jobs.workers`).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Apply flag overrides on top of file and environment settings.
    pub fn apply(&self, config: &mut ModscanConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(listen) = &self.listen {
            config.server.listen_addr = listen.clone();
        }
        if let Some(workers) = self.workers {
            config.jobs.workers = workers;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn flags_are_consistent() {
        DaemonCli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = DaemonCli::parse_from([
            "modscan-daemon",
            "--listen",
            "0.0.0.0:9000",
            "--workers",
            "12",
            "--log-format",
            "pretty",
        ]);
        let mut config = ModscanConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.jobs.workers, 12);
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.general.log_level, "info");
    }
}
