#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`ScanError`, `SandboxError`)
//! - [`config`]: Scanner configuration (`ScannerConfig`, builder)
//! - [`request`]: Scan/analysis request parsing (`ScanTarget`, `AnalysisRequest`, `EnqueueParams`)
//! - [`corpus`]: Module corpus files and import-count selection
//! - [`govulncheck`]: Tool invocation and JSON message stream decoding
//! - [`normalize`]: Finding canonicalization (`VulnRow`, `SinkKind`)
//! - [`diagnostics`]: Analysis JSON tree flattening (`DiagnosticRow`)
//! - [`category`]: Error categorization (`ErrorCategory`)
//! - [`version`]: Sortable version encoding
//! - [`work_version`]: Rescan gating (`WorkVersion`, `WorkVersionTracker`)
//! - [`build`]: Main package discovery and binary builds
//! - [`analysis`]: Analysis binary invocation
//! - [`process`]: Child reaping with peak memory measurement
//! - [`sandbox`]: Isolated execution (`ScanExecutor`, `DirectExecutor`, `SandboxExecutor`)
//! - [`fetch`]: Module download and workspace preparation
//! - [`rows`]: Warehouse result rows and table schemas
//! - [`module_scan`]: Main orchestrators (`ModuleScanner`, `AnalysisScanner`)
//!
//! # Architecture
//!
//! ```text
//! ScanTarget --> ModuleFetcher --> prepare_module
//!                                       |
//!                          +------------+------------+
//!                          |                         |
//!                    build_binaries            (source mode)
//!                          |                         |
//!                          +-----> ScanExecutor <----+
//!                                  (direct | sandbox)
//!                                       |
//!                           govulncheck JSON stream
//!                                       |
//!                               canonical_findings
//!                                       |
//!                                 VulnResultRow --> Warehouse
//! ```

pub mod analysis;
pub mod build;
pub mod category;
pub mod config;
pub mod corpus;
pub mod diagnostics;
pub mod error;
pub mod fetch;
pub mod govulncheck;
pub mod module_scan;
pub mod normalize;
pub mod process;
pub mod request;
pub mod rows;
pub mod sandbox;
pub mod version;
pub mod work_version;

// --- Public API Re-exports ---

// Orchestrators
pub use module_scan::{AnalysisScanner, ModuleScanner, ModuleScannerBuilder, PreparedBinary};

// Configuration
pub use config::{SCHEMA_VERSION, ScannerConfig, ScannerConfigBuilder};

// Error
pub use error::{SandboxError, ScanError};

// Requests
pub use request::{AnalysisRequest, EnqueueParams, ScanTarget};

// Stream decoding
pub use govulncheck::{MessageHandler, RunOptions, ScanOutput, ScanStats};

// Normalization
pub use category::{ErrorCategory, categorize, categorize_error};
pub use diagnostics::{DiagnosticRow, JsonTree, json_tree_to_diagnostics};
pub use normalize::{SinkKind, VulnRow, canonical_findings, symbol_rows, vuln_rows};
pub use version::for_sorting;

// Execution
pub use fetch::{FetchedModule, GoModDownload, ModuleFetcher};
pub use sandbox::{
    DirectExecutor, Envelope, Executor, SandboxExecutor, ScanExecutor, analysis_main,
    vulncheck_main,
};

// Rows
pub use rows::{ANALYSIS_TABLE, AnalysisResultRow, VULNCHECK_TABLE, VulnResultRow};
pub use work_version::{WorkKey, WorkVersion, WorkVersionTracker};
