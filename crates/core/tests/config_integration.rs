//! modscan.toml 통합 설정 테스트
//!
//! - modscan.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 파일 로딩 / 잘못된 형식 에러 테스트

use modscan_core::config::ModscanConfig;
use modscan_core::error::{ConfigError, ModscanError};

const EXAMPLE: &str = include_str!("../../../modscan.toml.example");

// =============================================================================
// modscan.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = ModscanConfig::parse(EXAMPLE).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.general.data_dir, "/var/lib/modscan");
}

#[test]
fn example_config_passes_validation() {
    let config = ModscanConfig::parse(EXAMPLE).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_matches_defaults() {
    let config = ModscanConfig::parse(EXAMPLE).expect("should parse");
    let defaults = ModscanConfig::default();

    assert_eq!(config.scanner.tool_path, defaults.scanner.tool_path);
    assert_eq!(config.scanner.vuln_db_path, defaults.scanner.vuln_db_path);
    assert_eq!(config.sandbox.runtime_args, defaults.sandbox.runtime_args);
    assert_eq!(config.sandbox.timeout_secs, defaults.sandbox.timeout_secs);
    assert_eq!(config.warehouse.chunk_size, defaults.warehouse.chunk_size);
    assert_eq!(config.jobs.queue_capacity, defaults.jobs.queue_capacity);
    assert_eq!(config.reqcount.max_concurrency, defaults.reqcount.max_concurrency);
    assert_eq!(config.metrics.port, defaults.metrics.port);
}

// =============================================================================
// 부분 설정 테스트
// =============================================================================

#[test]
fn partial_config_sandbox_only() {
    let toml = r#"
[sandbox]
enabled = true
runtime = "/usr/local/bin/runsc"
runtime_args = ["--rootless", "do"]
timeout_secs = 0
"#;
    let config = ModscanConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert!(config.sandbox.enabled);
    assert_eq!(config.sandbox.runtime_args, vec!["--rootless", "do"]);
    assert_eq!(config.sandbox.timeout_secs, 0);
    // 다른 섹션은 기본값
    assert_eq!(config.jobs.workers, 4);
}

#[test]
fn partial_config_two_sections() {
    let toml = r#"
[general]
log_level = "warn"

[jobs]
workers = 16
"#;
    let config = ModscanConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.general.log_level, "warn");
    assert_eq!(config.jobs.workers, 16);
    assert_eq!(config.jobs.update_max_attempts, 10);
    assert!(!config.sandbox.enabled);
}

#[test]
fn partial_config_with_invalid_value_fails_validation() {
    let toml = r#"
[warehouse]
chunk_size = 0
"#;
    let config = ModscanConfig::parse(toml).expect("should parse");
    let err = config.validate().unwrap_err();
    assert!(matches!(
        err,
        ModscanError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "warehouse.chunk_size"
    ));
}

#[test]
fn wrong_type_is_parse_error() {
    let toml = r#"
[jobs]
workers = "many"
"#;
    let err = ModscanConfig::parse(toml).unwrap_err();
    assert!(matches!(
        err,
        ModscanError::Config(ConfigError::ParseFailed { .. })
    ));
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[general]
log_level = "info"
"#;

    let original = std::env::var("MODSCAN_GENERAL_LOG_LEVEL").ok();
    // SAFETY: serial 테스트로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("MODSCAN_GENERAL_LOG_LEVEL", "error");
    }

    let mut config = ModscanConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    let result = config.general.log_level.clone();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("MODSCAN_GENERAL_LOG_LEVEL", val),
            None => std::env::remove_var("MODSCAN_GENERAL_LOG_LEVEL"),
        }
    }

    assert_eq!(result, "error");
}

#[test]
#[serial_test::serial]
fn env_override_sandbox_args_csv() {
    let original = std::env::var("MODSCAN_SANDBOX_RUNTIME_ARGS").ok();
    // SAFETY: serial 테스트로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("MODSCAN_SANDBOX_RUNTIME_ARGS", "--platform=ptrace,do");
    }

    let mut config = ModscanConfig::default();
    config.apply_env_overrides();
    let args = config.sandbox.runtime_args.clone();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("MODSCAN_SANDBOX_RUNTIME_ARGS", val),
            None => std::env::remove_var("MODSCAN_SANDBOX_RUNTIME_ARGS"),
        }
    }

    assert_eq!(args, vec!["--platform=ptrace", "do"]);
}

#[test]
#[serial_test::serial]
fn invalid_numeric_env_keeps_file_value() {
    let toml = r#"
[jobs]
workers = 7
"#;
    // SAFETY: serial 테스트로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("MODSCAN_JOBS_WORKERS", "lots");
    }
    let mut config = ModscanConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    // SAFETY: 테스트 정리
    unsafe {
        std::env::remove_var("MODSCAN_JOBS_WORKERS");
    }
    assert_eq!(config.jobs.workers, 7);
}

// =============================================================================
// 파일 로딩 테스트
// =============================================================================

#[tokio::test]
#[serial_test::serial]
async fn load_reads_file_and_validates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("modscan.toml");
    tokio::fs::write(&path, EXAMPLE).await.expect("write");

    let config = ModscanConfig::load(&path).await.expect("should load");
    assert_eq!(config.server.listen_addr, "127.0.0.1:8080");
}

#[tokio::test]
#[serial_test::serial]
async fn load_rejects_invalid_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("modscan.toml");
    tokio::fs::write(&path, "[general]\nlog_format = \"xml\"\n")
        .await
        .expect("write");

    let err = ModscanConfig::load(&path).await.unwrap_err();
    assert!(err.to_string().contains("log_format"));
}
