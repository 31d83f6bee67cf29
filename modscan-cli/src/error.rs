//! CLI-specific error types and exit code mapping

use modscan_core::error::{ModscanError, StorageError, WarehouseError};
use modscan_reqcount::ReqCountError;
use modscan_scanner::ScanError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to standard Unix exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Cannot connect to the daemon control server.
    #[error("server not reachable: {0}")]
    ServerUnavailable(String),

    /// The daemon answered with a non-200 status; the body is shown verbatim.
    #[error("{body}")]
    Server { status: u16, body: String },

    /// The scan completed and found vulnerabilities.
    #[error("found {0} vulnerabilities")]
    Vulnerable(usize),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from modscan-core.
    #[error("{0}")]
    Core(#[from] ModscanError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                              |
    /// |------|--------------------------------------|
    /// | 0    | Success                              |
    /// | 1    | General / command error              |
    /// | 2    | Configuration error                  |
    /// | 3    | Server unreachable                   |
    /// | 4    | Scan found vulnerabilities           |
    /// | 10   | IO error                             |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(ModscanError::Config(_)) => 2,
            Self::ServerUnavailable(_) => 3,
            Self::Vulnerable(_) => 4,
            Self::Io(_) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Server { .. } | Self::Core(_) => 1,
        }
    }
}

impl From<ScanError> for CliError {
    fn from(e: ScanError) -> Self {
        Self::Command(e.to_string())
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        Self::Command(format!("object store: {e}"))
    }
}

impl From<WarehouseError> for CliError {
    fn from(e: WarehouseError) -> Self {
        Self::Core(ModscanError::Warehouse(e))
    }
}

impl From<ReqCountError> for CliError {
    fn from(e: ReqCountError) -> Self {
        Self::Command(e.to_string())
    }
}

impl From<reqwest::Error> for CliError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::ServerUnavailable(e.to_string())
        } else {
            Self::Command(format!("request failed: {e}"))
        }
    }
}
