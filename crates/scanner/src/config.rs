//! 스캐너 설정
//!
//! [`ScannerConfig`]는 core의 `[scanner]`, `[sandbox]` 섹션을 합쳐
//! 스캔 실행에 필요한 값만 담습니다.
//!
//! # 사용 예시
//!
//! ```
//! use modscan_scanner::ScannerConfigBuilder;
//!
//! let config = ScannerConfigBuilder::new()
//!     .tool_path("/usr/local/bin/govulncheck")
//!     .vuln_db_path("/srv/vulndb")
//!     .build()
//!     .unwrap();
//! assert!(!config.sandbox_enabled);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use modscan_core::config::ModscanConfig;

use crate::error::ScanError;

/// 결과 행 스키마 버전. 행 형식이 바뀌면 올려서 이전 결과를 무효화합니다.
pub const SCHEMA_VERSION: &str = "3";

/// 스캐너 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// govulncheck 실행 파일
    pub tool_path: String,
    /// go 툴체인
    pub go_path: String,
    /// 로컬 취약점 DB 경로
    pub vuln_db_path: String,
    /// 작업 디렉토리
    pub work_dir: String,
    /// 워커 로직 버전
    pub worker_version: String,

    // --- 샌드박스 ---
    /// 샌드박스 사용 여부
    pub sandbox_enabled: bool,
    /// 샌드박스 런타임
    pub sandbox_runtime: String,
    /// 런타임 인자
    pub sandbox_runtime_args: Vec<String>,
    /// 샌드박스 내부 modscan 경로
    pub sandbox_program: String,
    /// 하드 타임아웃 (초, 0이면 없음)
    pub sandbox_timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::from_core(&ModscanConfig::default())
    }
}

impl ScannerConfig {
    /// core 설정에서 스캐너 설정을 생성합니다.
    pub fn from_core(core: &ModscanConfig) -> Self {
        Self {
            tool_path: core.scanner.tool_path.clone(),
            go_path: core.scanner.go_path.clone(),
            vuln_db_path: core.scanner.vuln_db_path.clone(),
            work_dir: core.scanner.work_dir.clone(),
            worker_version: core.scanner.worker_version.clone(),
            sandbox_enabled: core.sandbox.enabled,
            sandbox_runtime: core.sandbox.runtime.clone(),
            sandbox_runtime_args: core.sandbox.runtime_args.clone(),
            sandbox_program: core.sandbox.program.clone(),
            sandbox_timeout_secs: core.sandbox.timeout_secs,
        }
    }

    /// 샌드박스 타임아웃. 0이면 `None`.
    pub fn sandbox_timeout(&self) -> Option<Duration> {
        (self.sandbox_timeout_secs > 0).then(|| Duration::from_secs(self.sandbox_timeout_secs))
    }

    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ScanError> {
        for (field, value) in [
            ("tool_path", &self.tool_path),
            ("go_path", &self.go_path),
            ("vuln_db_path", &self.vuln_db_path),
            ("work_dir", &self.work_dir),
            ("worker_version", &self.worker_version),
        ] {
            if value.is_empty() {
                return Err(config_error(field, "must not be empty"));
            }
        }

        if Path::new(&self.vuln_db_path)
            .components()
            .any(|c| c == std::path::Component::ParentDir)
        {
            return Err(config_error(
                "vuln_db_path",
                "path contains traversal pattern '..'",
            ));
        }

        if self.sandbox_enabled {
            if self.sandbox_runtime.is_empty() {
                return Err(config_error(
                    "sandbox_runtime",
                    "must not be empty when the sandbox is enabled",
                ));
            }
            if self.sandbox_program.is_empty() {
                return Err(config_error(
                    "sandbox_program",
                    "must not be empty when the sandbox is enabled",
                ));
            }
        }

        Ok(())
    }
}

fn config_error(field: &str, reason: &str) -> ScanError {
    ScanError::Config {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

/// 스캐너 설정 빌더
#[derive(Debug, Default)]
pub struct ScannerConfigBuilder {
    config: ScannerConfig,
}

impl ScannerConfigBuilder {
    /// 기본값으로 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// govulncheck 경로
    pub fn tool_path(mut self, path: impl Into<String>) -> Self {
        self.config.tool_path = path.into();
        self
    }

    /// go 툴체인 경로
    pub fn go_path(mut self, path: impl Into<String>) -> Self {
        self.config.go_path = path.into();
        self
    }

    /// 취약점 DB 경로
    pub fn vuln_db_path(mut self, path: impl Into<String>) -> Self {
        self.config.vuln_db_path = path.into();
        self
    }

    /// 작업 디렉토리
    pub fn work_dir(mut self, path: impl Into<String>) -> Self {
        self.config.work_dir = path.into();
        self
    }

    /// 워커 로직 버전
    pub fn worker_version(mut self, version: impl Into<String>) -> Self {
        self.config.worker_version = version.into();
        self
    }

    /// 샌드박스 실행 설정
    pub fn sandbox(
        mut self,
        runtime: impl Into<String>,
        runtime_args: Vec<String>,
        program: impl Into<String>,
    ) -> Self {
        self.config.sandbox_enabled = true;
        self.config.sandbox_runtime = runtime.into();
        self.config.sandbox_runtime_args = runtime_args;
        self.config.sandbox_program = program.into();
        self
    }

    /// 샌드박스 하드 타임아웃 (초)
    pub fn sandbox_timeout_secs(mut self, secs: u64) -> Self {
        self.config.sandbox_timeout_secs = secs;
        self
    }

    /// 설정을 검증하고 반환합니다.
    pub fn build(self) -> Result<ScannerConfig, ScanError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
