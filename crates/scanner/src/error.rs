//! 스캐너 에러 타입
//!
//! [`ScanError`]는 스캔 실행 경로에서 발생할 수 있는 모든 에러를 나타냅니다.
//! `From<ScanError> for ModscanError` 구현을 통해 `?` 연산자로
//! 상위 에러 타입으로 전파됩니다.
//!
//! # 에러 카테고리
//!
//! - **요청 검증**: `InvalidRequest` (서브프로세스 시작 전)
//! - **서브프로세스**: `Start`, `ToolFailed`, `Decode`
//! - **모듈 준비**: `Fetch`, `GoCommand`
//! - **샌드박스 경계**: `Sandbox`
//! - **설정**: `Config`
//! - **파일 I/O**: `Io`
//! - **결과 저장소**: `Warehouse`

use modscan_core::error::{ConfigError, ModscanError, WarehouseError};

/// 스캐너 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// 잘못된 요청/인자
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// 서브프로세스 시작 실패 (실행 파일 없음, 권한 등)
    #[error("failed to start {program}: {source}")]
    Start {
        /// 실행 파일
        program: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },

    /// 허용되지 않은 종료 코드
    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    ToolFailed {
        /// 실행 파일
        program: String,
        /// 종료 코드 (시그널 종료면 `None`)
        code: Option<i32>,
        /// 캡처된 stderr
        stderr: String,
    },

    /// 출력 스트림 JSON 디코딩 실패
    #[error("decoding tool output: {0}")]
    Decode(String),

    /// 모듈 다운로드 실패
    #[error("fetching {module}: {reason}")]
    Fetch {
        /// `module@version`
        module: String,
        /// 실패 사유
        reason: String,
    },

    /// go 명령 실패
    #[error("go {command} failed: {stderr}")]
    GoCommand {
        /// 서브커맨드 (list, build, mod download)
        command: String,
        /// 캡처된 stderr
        stderr: String,
    },

    /// 샌드박스 경계 에러
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 파일 I/O 에러
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },

    /// 블로킹 태스크 실패
    #[error("scan task failed: {0}")]
    Task(String),

    /// 결과 저장소 조회 실패
    #[error("warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_owned(),
    }
}

/// 샌드박스 경계 에러
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// 샌드박스 런타임 실행 실패
    #[error("failed to launch sandbox runtime {runtime}: {source}")]
    Launch {
        /// 런타임 실행 파일
        runtime: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },

    /// 하드 타임아웃 초과
    #[error("sandboxed scan timed out after {secs}s")]
    Timeout {
        /// 타임아웃 (초)
        secs: u64,
    },

    /// 엔벨로프가 JSON이 아니거나 형식이 맞지 않음
    #[error("malformed sandbox envelope: {0}")]
    Malformed(String),

    /// 샌드박스 내부 프로그램이 보고한 에러
    #[error("{0}")]
    Remote(String),
}

impl From<ScanError> for ModscanError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Config { field, reason } => {
                ModscanError::Config(ConfigError::InvalidValue { field, reason })
            }
            ScanError::Io { path, source } => ModscanError::Scan(format!("{path}: {source}")),
            ScanError::Warehouse(err) => ModscanError::Warehouse(err),
            other => ModscanError::Scan(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failed_display_includes_stderr() {
        let err = ScanError::ToolFailed {
            program: "govulncheck".to_owned(),
            code: Some(1),
            stderr: "no go.mod file".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("no go.mod file"));
    }

    #[test]
    fn tool_killed_by_signal_display() {
        let err = ScanError::ToolFailed {
            program: "govulncheck".to_owned(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("a signal"));
    }

    #[test]
    fn sandbox_remote_is_transparent() {
        let err: ScanError = SandboxError::Remote("go: missing go.sum entry".to_owned()).into();
        assert_eq!(err.to_string(), "go: missing go.sum entry");
    }

    #[test]
    fn config_error_converts_to_modscan_config() {
        let err: ModscanError = ScanError::Config {
            field: "tool_path".to_owned(),
            reason: "must not be empty".to_owned(),
        }
        .into();
        assert!(matches!(err, ModscanError::Config(_)));
    }

    #[test]
    fn scan_error_converts_to_modscan_scan() {
        let err: ModscanError = ScanError::Decode("expected value".to_owned()).into();
        assert!(matches!(err, ModscanError::Scan(ref m) if m.contains("expected value")));
    }
}
