//! Tracing setup for modscan-daemon.
//!
//! Level and format come from `[general]`. `RUST_LOG` replaces the
//! configured filter entirely. HTTP client and server internals are held
//! at `warn` unless `RUST_LOG` says otherwise; at `debug` they drown out
//! per-task scan logs.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use modscan_core::config::GeneralConfig;

const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

/// Output format of the daemon log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow!(
                "unknown log format '{other}', expected 'json' or 'pretty'"
            )),
        }
    }
}

/// Filter directives for a configured level.
pub fn directives(level: &str) -> String {
    let mut out = level.to_owned();
    for target in QUIET_TARGETS {
        out.push_str(&format!(",{target}=warn"));
    }
    out
}

/// Install the global subscriber. Call once, before the first event.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let format = LogFormat::parse(&config.log_format)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(&config.log_level)))
        .map_err(|e| anyhow!("invalid log level '{}': {}", config.log_level, e))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };
    installed.map_err(|e| anyhow!("failed to initialize tracing: {e}"))
}
