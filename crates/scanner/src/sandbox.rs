//! 샌드박스 경계 -- 엔벨로프 프로토콜과 실행기
//!
//! 신뢰할 수 없는 코드를 다루는 스캔은 외부 샌드박스 런타임 안에서 실행됩니다.
//! 부모 프로세스와 샌드박스 내부 프로그램은 stdout의 JSON 엔벨로프 하나로
//! 통신합니다.
//!
//! ```text
//! parent (SandboxExecutor)
//!   <runtime> <runtime_args..> <program> sandbox vulncheck TOOL MODE DB DIR PATTERN
//!       |
//!   sandbox side (vulncheck_main) --> govulncheck::run --> Envelope
//!       |
//!   stdout: {"Error": "..."}  또는  결과 JSON 전체
//!       |
//!   parse_envelope: "Error" 키를 먼저 확인
//! ```
//!
//! 샌드박스 내부 프로그램은 항상 종료 코드 0으로 끝나고, 실패는 엔벨로프의
//! `Error` 필드로만 전달합니다.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use modscan_core::metrics as m;
use modscan_core::types::ScanMode;

use crate::analysis;
use crate::config::ScannerConfig;
use crate::diagnostics::JsonTree;
use crate::error::{SandboxError, ScanError};
use crate::govulncheck::{self, RunOptions, ScanOutput};
use crate::process::{UsageProbe, default_probe};

/// 에러 엔벨로프의 키
pub const ERROR_KEY: &str = "Error";

/// 디렉토리 인자가 없음을 나타내는 값
const NO_DIR: &str = "-";

/// 샌드박스 응답
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    /// 실패 메시지
    Error(String),
    /// 결과
    Result(T),
}

impl<T> Envelope<T> {
    /// 실행 결과를 엔벨로프로 감쌉니다.
    pub fn from_result(result: Result<T, ScanError>) -> Self {
        match result {
            Ok(value) => Self::Result(value),
            Err(e) => Self::Error(e.to_string()),
        }
    }

    /// 엔벨로프를 결과로 풉니다.
    pub fn into_result(self) -> Result<T, SandboxError> {
        match self {
            Self::Result(value) => Ok(value),
            Self::Error(message) => Err(SandboxError::Remote(message)),
        }
    }
}

impl<T: Serialize> Envelope<T> {
    /// JSON 값으로 변환합니다.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Error(message) => {
                let mut map = serde_json::Map::new();
                map.insert(ERROR_KEY.to_owned(), Value::String(message.clone()));
                Ok(Value::Object(map))
            }
            Self::Result(value) => serde_json::to_value(value),
        }
    }

    /// 한 줄 JSON으로 씁니다.
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let value = self.to_value().map_err(std::io::Error::other)?;
        serde_json::to_writer(&mut writer, &value).map_err(std::io::Error::other)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

/// 엔벨로프를 파싱합니다.
///
/// 객체에 `Error` 키가 있으면 그 메시지를 `Remote` 에러로 반환하고,
/// 없으면 전체를 결과 타입으로 읽습니다.
pub fn parse_envelope<T: DeserializeOwned>(data: &[u8]) -> Result<T, SandboxError> {
    let value: Value =
        serde_json::from_slice(data).map_err(|e| SandboxError::Malformed(e.to_string()))?;
    if let Some(error) = value.get(ERROR_KEY) {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(SandboxError::Remote(message));
    }
    serde_json::from_value(value).map_err(|e| SandboxError::Malformed(e.to_string()))
}

/// govulncheck 실행 인자
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VulncheckInvocation {
    /// govulncheck 실행 파일
    pub tool: PathBuf,
    /// `source` 또는 `binary`
    pub mode: ScanMode,
    /// 취약점 DB 경로
    pub db_path: PathBuf,
    /// 작업 디렉토리
    pub dir: Option<PathBuf>,
    /// 패턴 또는 바이너리 경로
    pub pattern: String,
}

impl VulncheckInvocation {
    const USAGE: &'static str = "usage: vulncheck TOOL MODE DB_PATH DIR|- PATTERN";

    /// 샌드박스 내부 프로그램에 넘길 인자
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.tool.display().to_string(),
            self.mode.as_str().to_owned(),
            self.db_path.display().to_string(),
            self.dir
                .as_ref()
                .map_or_else(|| NO_DIR.to_owned(), |d| d.display().to_string()),
            self.pattern.clone(),
        ]
    }

    /// 인자를 파싱합니다. 서브프로세스를 시작하기 전에 검증합니다.
    pub fn from_args(args: &[String]) -> Result<Self, ScanError> {
        let [tool, mode, db_path, dir, pattern] = args else {
            return Err(ScanError::InvalidRequest(format!(
                "{}; got {} arguments",
                Self::USAGE,
                args.len()
            )));
        };
        let mode = ScanMode::from_str_loose(mode)
            .filter(|m| m.tool_flag().is_some())
            .ok_or_else(|| {
                ScanError::InvalidRequest(format!("{}; invalid mode '{mode}'", Self::USAGE))
            })?;
        if tool.is_empty() || db_path.is_empty() || pattern.is_empty() {
            return Err(ScanError::InvalidRequest(format!(
                "{}; empty argument",
                Self::USAGE
            )));
        }
        Ok(Self {
            tool: PathBuf::from(tool),
            mode,
            db_path: PathBuf::from(db_path),
            dir: (dir != NO_DIR && !dir.is_empty()).then(|| PathBuf::from(dir)),
            pattern: pattern.clone(),
        })
    }

    /// 러너 옵션으로 변환합니다.
    pub fn run_options(&self, probe: Arc<dyn UsageProbe>) -> RunOptions {
        let mut opts = RunOptions::new(&self.tool, self.mode, &self.db_path, &self.pattern)
            .probe(probe);
        if let Some(dir) = &self.dir {
            opts = opts.dir(dir);
        }
        opts
    }
}

/// 분석 바이너리 실행 인자
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisInvocation {
    /// 분석 바이너리
    pub binary: PathBuf,
    /// 모듈 디렉토리
    pub dir: PathBuf,
    /// 바이너리 인자
    pub args: Vec<String>,
}

impl AnalysisInvocation {
    const USAGE: &'static str = "usage: analysis BINARY DIR [ARGS..]";

    /// 샌드박스 내부 프로그램에 넘길 인자
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.binary.display().to_string(),
            self.dir.display().to_string(),
        ];
        args.extend(self.args.iter().cloned());
        args
    }

    /// 인자를 파싱합니다.
    pub fn from_args(args: &[String]) -> Result<Self, ScanError> {
        let [binary, dir, rest @ ..] = args else {
            return Err(ScanError::InvalidRequest(format!(
                "{}; got {} arguments",
                Self::USAGE,
                args.len()
            )));
        };
        if binary.is_empty() || dir.is_empty() {
            return Err(ScanError::InvalidRequest(format!(
                "{}; empty argument",
                Self::USAGE
            )));
        }
        Ok(Self {
            binary: PathBuf::from(binary),
            dir: PathBuf::from(dir),
            args: rest.to_vec(),
        })
    }
}

/// 샌드박스 내부 govulncheck 진입점. 항상 엔벨로프를 반환합니다.
pub fn vulncheck_main(args: &[String]) -> Envelope<ScanOutput> {
    Envelope::from_result(
        VulncheckInvocation::from_args(args)
            .and_then(|inv| govulncheck::scan(&inv.run_options(default_probe()))),
    )
}

/// 샌드박스 내부 분석 바이너리 진입점. 항상 엔벨로프를 반환합니다.
pub fn analysis_main(args: &[String]) -> Envelope<JsonTree> {
    Envelope::from_result(
        AnalysisInvocation::from_args(args)
            .and_then(|inv| analysis::run(&inv.binary, &inv.args, &inv.dir)),
    )
}

/// 스캔 실행기
///
/// 같은 요청을 프로세스 안에서 직접 실행하거나 샌드박스 경계 너머에서
/// 실행합니다. 두 경우 모두 같은 결과 타입을 반환합니다.
pub trait ScanExecutor: Send + Sync + 'static {
    /// 실행기 이름 (로그용)
    fn name(&self) -> &'static str;

    /// govulncheck를 실행합니다.
    fn vulncheck(
        &self,
        invocation: VulncheckInvocation,
    ) -> impl Future<Output = Result<ScanOutput, ScanError>> + Send;

    /// 분석 바이너리를 실행합니다.
    fn analysis(
        &self,
        invocation: AnalysisInvocation,
    ) -> impl Future<Output = Result<JsonTree, ScanError>> + Send;
}

/// 현재 프로세스에서 블로킹 스레드로 실행
#[derive(Debug, Clone)]
pub struct DirectExecutor {
    probe: Arc<dyn UsageProbe>,
}

impl DirectExecutor {
    /// 기본 측정 전략으로 생성합니다.
    pub fn new() -> Self {
        Self {
            probe: default_probe(),
        }
    }

    /// 측정 전략을 지정합니다.
    pub fn with_probe(probe: Arc<dyn UsageProbe>) -> Self {
        Self { probe }
    }
}

impl Default for DirectExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanExecutor for DirectExecutor {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn vulncheck(&self, invocation: VulncheckInvocation) -> Result<ScanOutput, ScanError> {
        let opts = invocation.run_options(Arc::clone(&self.probe));
        tokio::task::spawn_blocking(move || govulncheck::scan(&opts))
            .await
            .map_err(|e| ScanError::Task(e.to_string()))?
    }

    async fn analysis(&self, invocation: AnalysisInvocation) -> Result<JsonTree, ScanError> {
        tokio::task::spawn_blocking(move || {
            analysis::run(&invocation.binary, &invocation.args, &invocation.dir)
        })
        .await
        .map_err(|e| ScanError::Task(e.to_string()))?
    }
}

/// 외부 샌드박스 런타임을 통해 실행
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    runtime: String,
    runtime_args: Vec<String>,
    program: String,
    timeout: Option<Duration>,
}

impl SandboxExecutor {
    /// 실행기를 생성합니다.
    pub fn new(
        runtime: impl Into<String>,
        runtime_args: Vec<String>,
        program: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            runtime_args,
            program: program.into(),
            timeout,
        }
    }

    /// 스캐너 설정에서 생성합니다.
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new(
            config.sandbox_runtime.clone(),
            config.sandbox_runtime_args.clone(),
            config.sandbox_program.clone(),
            config.sandbox_timeout(),
        )
    }

    async fn launch<T: DeserializeOwned>(
        &self,
        kind: &str,
        args: Vec<String>,
    ) -> Result<T, ScanError> {
        let mut command = tokio::process::Command::new(&self.runtime);
        command
            .args(&self.runtime_args)
            .arg(&self.program)
            .arg("sandbox")
            .arg(kind)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(runtime = %self.runtime, kind, args = ?args, "launching sandboxed scan");
        let child = command.spawn().map_err(|source| SandboxError::Launch {
            runtime: self.runtime.clone(),
            source,
        })?;

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    metrics::counter!(m::SCANNER_SANDBOX_TIMEOUTS_TOTAL).increment(1);
                    warn!(kind, secs = limit.as_secs(), "sandboxed scan timed out, killed");
                    return Err(SandboxError::Timeout {
                        secs: limit.as_secs(),
                    }
                    .into());
                }
            },
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| ScanError::Io {
            path: self.runtime.clone(),
            source,
        })?;

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::Malformed(format!(
                "no envelope from sandbox ({}): {}",
                output.status,
                stderr.trim()
            ))
            .into());
        }
        Ok(parse_envelope(&output.stdout)?)
    }
}

impl ScanExecutor for SandboxExecutor {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn vulncheck(&self, invocation: VulncheckInvocation) -> Result<ScanOutput, ScanError> {
        self.launch("vulncheck", invocation.to_args()).await
    }

    async fn analysis(&self, invocation: AnalysisInvocation) -> Result<JsonTree, ScanError> {
        self.launch("analysis", invocation.to_args()).await
    }
}

/// 설정에 따라 고른 실행기
#[derive(Debug, Clone)]
pub enum Executor {
    /// 직접 실행
    Direct(DirectExecutor),
    /// 샌드박스 실행
    Sandbox(SandboxExecutor),
}

impl Executor {
    /// `sandbox_enabled`에 따라 실행기를 고릅니다.
    pub fn from_config(config: &ScannerConfig) -> Self {
        if config.sandbox_enabled {
            Self::Sandbox(SandboxExecutor::from_config(config))
        } else {
            Self::Direct(DirectExecutor::new())
        }
    }
}

impl ScanExecutor for Executor {
    fn name(&self) -> &'static str {
        match self {
            Self::Direct(e) => e.name(),
            Self::Sandbox(e) => e.name(),
        }
    }

    async fn vulncheck(&self, invocation: VulncheckInvocation) -> Result<ScanOutput, ScanError> {
        match self {
            Self::Direct(e) => e.vulncheck(invocation).await,
            Self::Sandbox(e) => e.vulncheck(invocation).await,
        }
    }

    async fn analysis(&self, invocation: AnalysisInvocation) -> Result<JsonTree, ScanError> {
        match self {
            Self::Direct(e) => e.analysis(invocation).await,
            Self::Sandbox(e) => e.analysis(invocation).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn error_envelope_is_probed_first() {
        let err = parse_envelope::<ScanOutput>(br#"{"Error":"boom","findings":[]}"#).unwrap_err();
        assert!(matches!(err, SandboxError::Remote(ref m) if m == "boom"));
    }

    #[test]
    fn result_envelope_roundtrip() {
        let envelope = Envelope::Result(ScanOutput::default());
        let mut buf = Vec::new();
        envelope.write_to(&mut buf).unwrap();
        let parsed: ScanOutput = parse_envelope(&buf).unwrap();
        assert_eq!(parsed, ScanOutput::default());
    }

    #[test]
    fn error_envelope_shape() {
        let envelope: Envelope<ScanOutput> = Envelope::Error("bad".to_owned());
        assert_eq!(
            envelope.to_value().unwrap(),
            serde_json::json!({"Error": "bad"})
        );
    }

    #[test]
    fn malformed_envelope() {
        assert!(matches!(
            parse_envelope::<ScanOutput>(b"not json"),
            Err(SandboxError::Malformed(_))
        ));
    }

    #[test]
    fn vulncheck_invocation_args_roundtrip() {
        let inv = VulncheckInvocation {
            tool: PathBuf::from("/usr/bin/govulncheck"),
            mode: ScanMode::Binary,
            db_path: PathBuf::from("/db"),
            dir: None,
            pattern: "/tmp/b/cmd".to_owned(),
        };
        let args = inv.to_args();
        assert_eq!(args[3], "-");
        assert_eq!(VulncheckInvocation::from_args(&args).unwrap(), inv);
    }

    #[test]
    fn usage_errors_return_error_envelope_without_running() {
        match vulncheck_main(&strings(&["only-one"])) {
            Envelope::Error(message) => assert!(message.contains("usage")),
            Envelope::Result(_) => panic!("expected error envelope"),
        }
        match vulncheck_main(&strings(&["tool", "compare", "/db", "-", "./..."])) {
            Envelope::Error(message) => assert!(message.contains("invalid mode")),
            Envelope::Result(_) => panic!("expected error envelope"),
        }
        assert!(matches!(analysis_main(&[]), Envelope::Error(_)));
    }

    #[test]
    fn analysis_invocation_keeps_trailing_args() {
        let inv = AnalysisInvocation::from_args(&strings(&["/b", "/m", "-x", "-y"])).unwrap();
        assert_eq!(inv.args, strings(&["-x", "-y"]));
        assert_eq!(inv.to_args(), strings(&["/b", "/m", "-x", "-y"]));
    }

    #[test]
    fn executor_selection() {
        let mut config = ScannerConfig::default();
        assert_eq!(Executor::from_config(&config).name(), "direct");
        config.sandbox_enabled = true;
        assert_eq!(Executor::from_config(&config).name(), "sandbox");
    }
}
