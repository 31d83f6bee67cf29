//! Integration tests for `modscan config` command.
//!
//! Tests config validation and display functionality with real TOML files.

use std::fs;
use tempfile::TempDir;

use modscan_cli::commands::config::{show, validate};
use modscan_cli::error::CliError;

fn write_config(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("should write config");
    path
}

#[tokio::test]
async fn test_config_validate_valid_toml() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = write_config(
        &temp_dir,
        "modscan.toml",
        r#"
[general]
log_level = "info"
log_format = "json"

[jobs]
workers = 4
"#,
    );

    let report = validate(&config_path).await;

    assert!(report.valid, "valid config: {:?}", report.errors);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_config_validate_malformed_toml() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = write_config(&temp_dir, "bad.toml", "[general\nlog_level = \"info\"\n");

    let report = validate(&config_path).await;

    assert!(!report.valid, "malformed TOML should fail to load");
    assert_eq!(report.errors.len(), 1);
}

#[tokio::test]
async fn test_config_validate_rejects_zero_workers() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = write_config(&temp_dir, "zero.toml", "[jobs]\nworkers = 0\n");

    let report = validate(&config_path).await;

    assert!(!report.valid);
    assert!(report.errors[0].contains("workers"), "{:?}", report.errors);
}

#[tokio::test]
async fn test_config_validate_missing_file() {
    let report = validate(std::path::Path::new("/nonexistent/modscan.toml")).await;
    assert!(!report.valid, "missing file should fail to load");
    assert!(report.errors[0].contains("not found"));
}

#[tokio::test]
async fn test_config_show_section_only() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = write_config(
        &temp_dir,
        "modscan.toml",
        "[jobs]\nworkers = 7\n\n[reqcount]\nlog_prefix = \"logs\"\n",
    );

    let report = show(&config_path, Some("jobs")).await.expect("show jobs");

    assert_eq!(report.section.as_deref(), Some("jobs"));
    assert!(report.config_toml.contains("workers = 7"));
    assert!(!report.config_toml.contains("log_prefix"));
}

#[tokio::test]
async fn test_config_show_redacts_auth_token() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = write_config(
        &temp_dir,
        "modscan.toml",
        "[server]\nauth_token = \"hunter2\"\n",
    );

    let report = show(&config_path, None).await.expect("show full config");

    assert!(!report.config_toml.contains("hunter2"));
    assert!(report.config_toml.contains("REDACTED"));
    assert!(report.config_toml.contains("[scanner]"));
}

#[tokio::test]
async fn test_config_show_unknown_section() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = write_config(&temp_dir, "modscan.toml", "");

    let err = show(&config_path, Some("ebpf")).await.err().expect("unknown section");

    assert!(matches!(err, CliError::Command(_)));
    assert!(err.to_string().contains("unknown section: ebpf"));
}

#[tokio::test]
async fn test_example_config_validates() {
    let example = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("modscan.toml.example");

    let report = validate(&example).await;

    assert!(report.valid, "example config: {:?}", report.errors);
}
