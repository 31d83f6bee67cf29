//! `modscan scan` command handler
//!
//! `module@version` targets are fetched with `go mod download` and scanned
//! through the configured executor (sandboxed when enabled), exactly as a
//! daemon worker would. A local directory is trusted and scanned in-process
//! in source mode.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use modscan_core::config::ModscanConfig;
use modscan_core::types::ScanMode;
use modscan_scanner::sandbox::VulncheckInvocation;
use modscan_scanner::{
    DirectExecutor, Executor, GoModDownload, ModuleScannerBuilder, ScanExecutor, ScanTarget,
    ScannerConfig, VulnResultRow, VulnRow, vuln_rows,
};

use crate::cli::ScanArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Pattern scanned in a local module directory.
const DIR_PATTERN: &str = "./...";

/// Execute the `scan` command.
///
/// Returns `CliError::Vulnerable` (exit code 4) when the scan found
/// vulnerabilities, after the report has been rendered.
pub async fn execute(
    args: ScanArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = ModscanConfig::load(config_path).await?;
    let mut scanner_config = ScannerConfig::from_core(&config);
    if let Some(db) = &args.db {
        scanner_config.vuln_db_path = db.display().to_string();
    }
    if let Some(tool) = &args.tool {
        scanner_config.tool_path = tool.display().to_string();
    }
    scanner_config.validate()?;

    let mode = parse_mode(&args.mode)?;
    let target = Path::new(&args.target);
    let report = if target.is_dir() {
        scan_dir(&scanner_config, target, mode).await?
    } else {
        scan_module(scanner_config, &args.target, mode).await?
    };

    writer.render(&report)?;
    report.outcome()
}

fn parse_mode(raw: &str) -> Result<ScanMode, CliError> {
    ScanMode::from_str_loose(raw).ok_or_else(|| {
        CliError::Command(format!(
            "invalid scan mode: {} (expected: source, binary, compare)",
            raw
        ))
    })
}

/// Split `module@version`.
pub fn parse_module_version(raw: &str) -> Result<(&str, &str), CliError> {
    match raw.rsplit_once('@') {
        Some((module, version)) if !module.is_empty() && !version.is_empty() => {
            Ok((module, version))
        }
        _ => Err(CliError::Command(format!(
            "'{raw}' is neither a directory nor module@version"
        ))),
    }
}

/// Scan a downloaded module version through the configured executor.
pub async fn scan_module(
    config: ScannerConfig,
    raw: &str,
    mode: ScanMode,
) -> Result<ScanReport, CliError> {
    let (module, version) = parse_module_version(raw)?;
    let target = ScanTarget::new(module, version, mode)?;

    let executor = Executor::from_config(&config);
    let fetcher = GoModDownload::new(&config.go_path, &config.work_dir);
    let scanner = ModuleScannerBuilder::new()
        .config(config)
        .executor(executor)
        .fetcher(fetcher)
        .build()?;
    info!(target = %target, executor = scanner.executor_name(), "scanning module");

    let rows = scanner.scan(&target).await;
    Ok(ScanReport {
        target: raw.to_owned(),
        mode: mode.as_str().to_owned(),
        results: rows.into_iter().map(ScanResultEntry::from).collect(),
    })
}

/// Scan a local module directory in-process (source mode only).
pub async fn scan_dir(
    config: &ScannerConfig,
    dir: &Path,
    mode: ScanMode,
) -> Result<ScanReport, CliError> {
    if mode != ScanMode::Source {
        return Err(CliError::Command(format!(
            "directory targets support source mode only, got {}",
            mode.as_str()
        )));
    }

    let invocation = VulncheckInvocation {
        tool: PathBuf::from(&config.tool_path),
        mode,
        db_path: PathBuf::from(&config.vuln_db_path),
        dir: Some(dir.to_path_buf()),
        pattern: DIR_PATTERN.to_owned(),
    };
    info!(dir = %dir.display(), "scanning local directory");

    let output = DirectExecutor::new().vulncheck(invocation).await?;
    let entry = ScanResultEntry {
        module: dir.display().to_string(),
        version: String::new(),
        binary: String::new(),
        error: String::new(),
        error_category: String::new(),
        vulns: vuln_rows(output.findings),
    };

    Ok(ScanReport {
        target: dir.display().to_string(),
        mode: mode.as_str().to_owned(),
        results: vec![entry],
    })
}

/// One scanned unit (module source or one built binary).
#[derive(Debug, Serialize)]
pub struct ScanResultEntry {
    pub module: String,
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub binary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_category: String,
    pub vulns: Vec<VulnRow>,
}

impl From<VulnResultRow> for ScanResultEntry {
    fn from(row: VulnResultRow) -> Self {
        Self {
            module: row.module_path,
            version: row.version,
            binary: row.binary_name,
            error: row.error,
            error_category: row.error_category,
            vulns: row.vulns,
        }
    }
}

/// Result of a one-shot scan.
#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub target: String,
    pub mode: String,
    pub results: Vec<ScanResultEntry>,
}

impl ScanReport {
    /// Distinct vulnerability IDs across all results.
    pub fn vuln_ids(&self) -> BTreeSet<&str> {
        self.results
            .iter()
            .flat_map(|r| r.vulns.iter().map(|v| v.id.as_str()))
            .collect()
    }

    /// Map the report to the command result: a failed scan is an error,
    /// any vulnerability is `Vulnerable`.
    pub fn outcome(&self) -> Result<(), CliError> {
        if let Some(failed) = self.results.iter().find(|r| !r.error.is_empty()) {
            return Err(CliError::Command(format!(
                "scan of {} failed: {}",
                self.target, failed.error
            )));
        }
        match self.vuln_ids().len() {
            0 => Ok(()),
            n => Err(CliError::Vulnerable(n)),
        }
    }
}

impl Render for ScanReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Scan: {} ({} mode)", self.target.bold(), self.mode)?;
        for result in &self.results {
            let label = if result.binary.is_empty() {
                result.module.clone()
            } else {
                format!("{} [{}]", result.module, result.binary)
            };
            if !result.error.is_empty() {
                writeln!(
                    w,
                    "  {} {}: {} ({})",
                    "ERROR".red().bold(),
                    label,
                    result.error,
                    result.error_category
                )?;
                continue;
            }
            if result.vulns.is_empty() {
                writeln!(w, "  {} {}: no vulnerabilities", "OK".green().bold(), label)?;
                continue;
            }
            writeln!(
                w,
                "  {} {}: {} findings",
                "VULN".yellow().bold(),
                label,
                result.vulns.len()
            )?;
            for vuln in &result.vulns {
                let place = [vuln.package_path.as_str(), vuln.symbol.as_str()]
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                let called = if vuln.called { "called" } else { "not called" };
                writeln!(
                    w,
                    "    {:<16} {:<8} {} ({})",
                    vuln.id,
                    vuln.sink.as_str(),
                    if place.is_empty() { &vuln.module_path } else { &place },
                    called
                )?;
            }
        }
        Ok(())
    }
}
