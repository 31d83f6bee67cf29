//! modscan CLI library: argument definitions, command handlers and output.
//!
//! The `modscan` binary is a thin wrapper over [`run`]; integration tests
//! drive the command handlers directly.

pub mod cli;
pub mod client;
pub mod commands;
pub mod error;
pub mod output;

use cli::{Cli, Commands};
use error::CliError;
use output::OutputWriter;

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    match cli.command {
        Commands::Scan(args) => commands::scan::execute(args, &cli.config, &writer).await,
        Commands::Sandbox(args) => commands::sandbox::execute(args),
        Commands::Jobs(args) => commands::jobs::execute(args, &writer).await,
        Commands::Analysis(args) => commands::analysis::execute(args, &cli.config, &writer).await,
        Commands::Config(args) => commands::config::execute(args, &cli.config, &writer).await,
        Commands::Reqcount(args) => commands::reqcount::execute(args, &cli.config, &writer).await,
    }
}
