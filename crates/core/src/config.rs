//! 설정 관리 — modscan.toml 파싱 및 런타임 설정
//!
//! [`ModscanConfig`]는 모든 크레이트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`MODSCAN_SCANNER_TOOL_PATH=/usr/local/bin/govulncheck` 형식)
//! 3. 설정 파일 (`modscan.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), modscan_core::error::ModscanError> {
//! use modscan_core::config::ModscanConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ModscanConfig::load("modscan.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ModscanConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ModscanError};

/// 경로 설정값의 최대 길이
const MAX_PATH_LEN: usize = 4096;

/// modscan 통합 설정
///
/// `modscan.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 크레이트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModscanConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 스캐너 설정 (govulncheck, go 툴체인, 취약점 DB)
    #[serde(default)]
    pub scanner: ScannerSection,
    /// 외부 샌드박스 런타임 설정
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// 결과 웨어하우스 설정
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    /// 오브젝트 스토어 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 작업 큐/워커 설정
    #[serde(default)]
    pub jobs: JobsConfig,
    /// HTTP 제어 서버 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 요청 수 집계 설정
    #[serde(default)]
    pub reqcount: ReqCountConfig,
    /// 메트릭 익스포터 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ModscanConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ModscanError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ModscanError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ModscanError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ModscanError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ModscanError> {
        toml::from_str(toml_str).map_err(|e| {
            ModscanError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `MODSCAN_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "MODSCAN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "MODSCAN_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "MODSCAN_GENERAL_DATA_DIR");

        // Scanner
        override_string(&mut self.scanner.tool_path, "MODSCAN_SCANNER_TOOL_PATH");
        override_string(&mut self.scanner.go_path, "MODSCAN_SCANNER_GO_PATH");
        override_string(
            &mut self.scanner.vuln_db_path,
            "MODSCAN_SCANNER_VULN_DB_PATH",
        );
        override_string(&mut self.scanner.work_dir, "MODSCAN_SCANNER_WORK_DIR");
        override_string(
            &mut self.scanner.worker_version,
            "MODSCAN_SCANNER_WORKER_VERSION",
        );

        // Sandbox
        override_bool(&mut self.sandbox.enabled, "MODSCAN_SANDBOX_ENABLED");
        override_string(&mut self.sandbox.runtime, "MODSCAN_SANDBOX_RUNTIME");
        override_csv(
            &mut self.sandbox.runtime_args,
            "MODSCAN_SANDBOX_RUNTIME_ARGS",
        );
        override_string(&mut self.sandbox.program, "MODSCAN_SANDBOX_PROGRAM");
        override_u64(
            &mut self.sandbox.timeout_secs,
            "MODSCAN_SANDBOX_TIMEOUT_SECS",
        );

        // Warehouse
        override_string(&mut self.warehouse.dir, "MODSCAN_WAREHOUSE_DIR");
        override_usize(
            &mut self.warehouse.chunk_size,
            "MODSCAN_WAREHOUSE_CHUNK_SIZE",
        );
        override_u64(
            &mut self.warehouse.insert_timeout_secs,
            "MODSCAN_WAREHOUSE_INSERT_TIMEOUT_SECS",
        );

        // Storage
        override_string(&mut self.storage.root, "MODSCAN_STORAGE_ROOT");

        // Jobs
        override_usize(&mut self.jobs.workers, "MODSCAN_JOBS_WORKERS");
        override_usize(
            &mut self.jobs.queue_capacity,
            "MODSCAN_JOBS_QUEUE_CAPACITY",
        );
        override_u32(
            &mut self.jobs.update_max_attempts,
            "MODSCAN_JOBS_UPDATE_MAX_ATTEMPTS",
        );
        override_string(&mut self.jobs.corpus_file, "MODSCAN_JOBS_CORPUS_FILE");

        // Server
        override_string(&mut self.server.listen_addr, "MODSCAN_SERVER_LISTEN_ADDR");
        override_string(&mut self.server.auth_token, "MODSCAN_SERVER_AUTH_TOKEN");

        // Request counts
        override_string(&mut self.reqcount.log_prefix, "MODSCAN_REQCOUNT_LOG_PREFIX");
        override_usize(
            &mut self.reqcount.max_concurrency,
            "MODSCAN_REQCOUNT_MAX_CONCURRENCY",
        );
        override_u64(
            &mut self.reqcount.quota_backoff_secs,
            "MODSCAN_REQCOUNT_QUOTA_BACKOFF_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "MODSCAN_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "MODSCAN_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "MODSCAN_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ModscanError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.scanner.tool_path.is_empty() {
            return Err(invalid("scanner.tool_path", "must not be empty"));
        }

        if self.scanner.worker_version.is_empty() {
            return Err(invalid("scanner.worker_version", "must not be empty"));
        }

        if self.sandbox.enabled {
            if self.sandbox.runtime.is_empty() {
                return Err(invalid(
                    "sandbox.runtime",
                    "runtime must not be empty when the sandbox is enabled",
                ));
            }
            if self.sandbox.program.is_empty() {
                return Err(invalid(
                    "sandbox.program",
                    "program must not be empty when the sandbox is enabled",
                ));
            }
        }

        if self.warehouse.chunk_size == 0 {
            return Err(invalid("warehouse.chunk_size", "must be greater than 0"));
        }

        if self.warehouse.insert_timeout_secs == 0 {
            return Err(invalid(
                "warehouse.insert_timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.jobs.workers == 0 || self.jobs.workers > 256 {
            return Err(invalid("jobs.workers", "must be 1-256"));
        }

        if self.jobs.queue_capacity == 0 {
            return Err(invalid("jobs.queue_capacity", "must be greater than 0"));
        }

        if self.jobs.update_max_attempts == 0 {
            return Err(invalid(
                "jobs.update_max_attempts",
                "must be greater than 0",
            ));
        }

        if self.reqcount.max_concurrency == 0 || self.reqcount.max_concurrency > 64 {
            return Err(invalid("reqcount.max_concurrency", "must be 1-64"));
        }

        for (field, value) in [
            ("general.data_dir", &self.general.data_dir),
            ("scanner.work_dir", &self.scanner.work_dir),
            ("warehouse.dir", &self.warehouse.dir),
            ("storage.root", &self.storage.root),
        ] {
            validate_path(field, value)?;
        }

        if !self.jobs.corpus_file.is_empty() {
            validate_path("jobs.corpus_file", &self.jobs.corpus_file)?;
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ModscanError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 경로 설정값 검증: 비어있지 않고, `..` 컴포넌트가 없고, 길이 제한 이내
fn validate_path(field: &str, value: &str) -> Result<(), ModscanError> {
    if value.is_empty() {
        return Err(invalid(field, "path must not be empty"));
    }
    if Path::new(value)
        .components()
        .any(|c| c == std::path::Component::ParentDir)
    {
        return Err(invalid(field, "path contains traversal pattern '..'"));
    }
    if value.len() > MAX_PATH_LEN {
        return Err(invalid(
            field,
            format!("path exceeds maximum length {MAX_PATH_LEN}"),
        ));
    }
    Ok(())
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/modscan".to_owned(),
        }
    }
}

/// 스캐너 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSection {
    /// govulncheck 실행 파일 경로
    pub tool_path: String,
    /// go 툴체인 경로 (모듈 다운로드, 바이너리 빌드)
    pub go_path: String,
    /// 로컬 취약점 DB 스냅샷 경로
    pub vuln_db_path: String,
    /// 모듈/바이너리 작업 디렉토리
    pub work_dir: String,
    /// 워커 로직 버전 (결과 재사용 판단에 사용)
    pub worker_version: String,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            tool_path: "govulncheck".to_owned(),
            go_path: "go".to_owned(),
            vuln_db_path: "/var/lib/modscan/vulndb".to_owned(),
            work_dir: "/tmp/modscan".to_owned(),
            worker_version: "1".to_owned(),
        }
    }
}

/// 외부 샌드박스 런타임 설정
///
/// 활성화되면 스캔은 `<runtime> <runtime_args..> <program> sandbox ...` 형태로
/// 실행되고, 결과는 stdout의 JSON 엔벨로프로 돌아옵니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// 샌드박스 사용 여부 (false면 직접 실행)
    pub enabled: bool,
    /// 샌드박스 런타임 실행 파일 (예: runsc)
    pub runtime: String,
    /// 런타임 인자
    pub runtime_args: Vec<String>,
    /// 샌드박스 내부에서 실행할 modscan 실행 파일 경로
    pub program: String,
    /// 스캔 하드 타임아웃 (초). 0이면 타임아웃 없음
    pub timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            runtime: "runsc".to_owned(),
            runtime_args: vec!["--network=none".to_owned(), "do".to_owned()],
            program: "/usr/local/bin/modscan".to_owned(),
            timeout_secs: 1800,
        }
    }
}

/// 결과 웨어하우스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// 테이블 파일 디렉토리 (JSONL 백엔드)
    pub dir: String,
    /// 업로드 청크 크기 (행 수)
    pub chunk_size: usize,
    /// 대량 삽입 데드라인 (초)
    pub insert_timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            dir: "/var/lib/modscan/warehouse".to_owned(),
            chunk_size: 1024,
            insert_timeout_secs: 300,
        }
    }
}

/// 오브젝트 스토어 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 버킷 루트 디렉토리
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "/var/lib/modscan/objects".to_owned(),
        }
    }
}

/// 작업 큐/워커 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// 동시 실행 워커 수
    pub workers: usize,
    /// 태스크 큐 용량
    pub queue_capacity: usize,
    /// Job 갱신 CAS 재시도 최대 횟수
    pub update_max_attempts: u32,
    /// 기본 모듈 목록 파일 (enqueue 요청에 `file`이 없을 때 사용)
    pub corpus_file: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 4096,
            update_max_attempts: 10,
            corpus_file: String::new(),
        }
    }
}

/// HTTP 제어 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 수신 주소
    pub listen_addr: String,
    /// Bearer 토큰 (비어있으면 인증 없음)
    pub auth_token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_owned(),
            auth_token: String::new(),
        }
    }
}

/// 요청 수 집계 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReqCountConfig {
    /// 로그 버킷 내 접두어
    pub log_prefix: String,
    /// 동시 오브젝트 읽기 상한
    pub max_concurrency: usize,
    /// 쿼터 소진 시 재시도 대기 (초)
    pub quota_backoff_secs: u64,
}

impl Default for ReqCountConfig {
    fn default() -> Self {
        Self {
            log_prefix: "access-logs".to_owned(),
            max_concurrency: 5,
            quota_backoff_secs: 5,
        }
    }
}

/// 메트릭 익스포터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
