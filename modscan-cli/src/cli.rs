//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Default control server address of `modscan-daemon`.
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

/// modscan -- Go module vulnerability scan coordinator.
///
/// Use `modscan <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "modscan", version, about, long_about = None)]
pub struct Cli {
    /// Path to the modscan.toml configuration file.
    #[arg(short, long, default_value = "modscan.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a one-shot local govulncheck scan.
    Scan(ScanArgs),

    /// Entrypoints run inside the sandbox runtime.
    Sandbox(SandboxArgs),

    /// Inspect and cancel jobs on a running daemon.
    Jobs(JobsArgs),

    /// Upload an analysis binary and start a bulk analysis job.
    Analysis(AnalysisArgs),

    /// Manage configuration.
    Config(ConfigArgs),

    /// Count requests per IP in one day of access logs.
    Reqcount(ReqcountArgs),
}

// ---- scan ----

/// Scan `module@version` (fetched with `go mod download`) or a local module directory.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// `module@version` or a directory containing a go.mod.
    pub target: String,

    /// Scan mode (source, binary, compare). Directories support source only.
    #[arg(long, default_value = "source")]
    pub mode: String,

    /// Override the vulnerability database path.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Override the govulncheck executable.
    #[arg(long)]
    pub tool: Option<PathBuf>,
}

// ---- sandbox ----

/// Sandbox-side entrypoints. Always exit 0 and print a result envelope.
#[derive(Args, Debug)]
pub struct SandboxArgs {
    #[command(subcommand)]
    pub action: SandboxAction,
}

#[derive(Subcommand, Debug)]
pub enum SandboxAction {
    /// Run govulncheck: TOOL MODE DB_PATH DIR|- PATTERN
    Vulncheck {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run an analysis binary: BINARY DIR [ARGS..]
    Analysis {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

// ---- jobs ----

/// Job management against `modscan-daemon`.
///
/// The bearer token is read from `MODSCAN_TOKEN`.
#[derive(Args, Debug)]
pub struct JobsArgs {
    /// Control server base URL.
    #[arg(long, default_value = DEFAULT_SERVER)]
    pub server: String,

    #[command(subcommand)]
    pub action: JobsAction,
}

#[derive(Subcommand, Debug)]
pub enum JobsAction {
    /// List all jobs, newest first.
    List,
    /// Show one job with its ETA.
    Show {
        /// Job ID.
        id: String,
    },
    /// Cancel a job. Tasks already running finish.
    Cancel {
        /// Job ID.
        id: String,
    },
    /// Show the latest analysis results of a job.
    Results {
        /// Job ID.
        id: String,
        /// Only rows with an error.
        #[arg(long)]
        errors: bool,
    },
}

// ---- analysis ----

#[derive(Args, Debug)]
pub struct AnalysisArgs {
    #[command(subcommand)]
    pub action: AnalysisAction,
}

#[derive(Subcommand, Debug)]
pub enum AnalysisAction {
    /// Upload the binary (and module file) then enqueue one task per selected module.
    Enqueue(EnqueueArgs),
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Path to the analysis binary.
    #[arg(long)]
    pub binary: PathBuf,

    /// Requesting user.
    #[arg(long)]
    pub user: String,

    /// Minimum import count (inclusive).
    #[arg(long, default_value_t = 0)]
    pub min: u64,

    /// Maximum import count (inclusive).
    #[arg(long)]
    pub max: Option<u64>,

    /// Arguments passed to the binary, space separated.
    #[arg(long, allow_hyphen_values = true)]
    pub args: Option<String>,

    /// Local module list to upload instead of the server's default corpus.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Control server base URL.
    #[arg(long, default_value = DEFAULT_SERVER)]
    pub server: String,
}

// ---- config ----

/// Manage modscan configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, scanner, sandbox, storage,
        /// warehouse, jobs, server, reqcount, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}

// ---- reqcount ----

/// Aggregate one day of access logs.
#[derive(Args, Debug)]
pub struct ReqcountArgs {
    /// Day to count (YYYY-MM-DD).
    pub date: String,

    /// Object prefix of the logs (default: `reqcount.log_prefix`).
    #[arg(long)]
    pub prefix: Option<String>,

    /// Bucket root directory (default: `storage.root`).
    #[arg(long)]
    pub bucket: Option<PathBuf>,

    /// Append the counts to the warehouse under `warehouse.dir`.
    #[arg(long)]
    pub upload: bool,
}
