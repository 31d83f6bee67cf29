//! govulncheck 서브프로세스 실행기
//!
//! 도구를 `-json` 모드로 실행하고, stdout을 버퍼링 없이 증분 디코딩하여
//! 메시지마다 [`MessageHandler`]로 전달합니다.
//!
//! ```text
//! <tool> -mode {source|binary} -json -db <file-URI> [-C <dir>] <pattern>
//!          |
//!        stdout --> StreamDeserializer --> MessageHandler (Collector)
//!        stderr --> helper thread --> ToolFailed { stderr }
//!          |
//!        UsageProbe::wait --> ScanStats { scan_seconds, peak_memory_bytes }
//! ```
//!
//! 종료 코드 0과 [`FINDINGS_EXIT_CODE`]는 성공입니다.

pub mod protocol;

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use modscan_core::types::ScanMode;

use crate::error::ScanError;
use crate::process::{UsageProbe, default_probe};

pub use protocol::{Config, Finding, Frame, Message, Osv, Progress, Sbom};

/// "취약점 발견, 스캔은 성공" 종료 코드
pub const FINDINGS_EXIT_CODE: i32 = 3;

/// 취약점 DB 경로를 `file://` URI로 변환합니다.
///
/// 상대 경로는 현재 디렉토리 기준 절대 경로로 바꿉니다.
pub fn db_uri(path: &Path) -> Result<String, ScanError> {
    let absolute = std::path::absolute(path).map_err(|source| ScanError::Io {
        path: path.display().to_string(),
        source,
    })?;
    file_uri(&absolute)
}

#[cfg(not(windows))]
fn file_uri(absolute: &Path) -> Result<String, ScanError> {
    Ok(format!("file://{}", absolute.display()))
}

#[cfg(windows)]
fn file_uri(absolute: &Path) -> Result<String, ScanError> {
    url::Url::from_file_path(absolute)
        .map(|u| u.to_string())
        .map_err(|()| {
            ScanError::InvalidRequest(format!(
                "cannot convert {} to a file URI",
                absolute.display()
            ))
        })
}

/// 도구 인자를 구성합니다.
///
/// `Compare` 모드는 단일 실행 모드가 아니므로 에러입니다.
pub fn tool_args(
    mode: ScanMode,
    db_uri: &str,
    dir: Option<&Path>,
    pattern: &str,
) -> Result<Vec<String>, ScanError> {
    let flag = mode.tool_flag().ok_or_else(|| {
        ScanError::InvalidRequest(format!("mode '{mode}' cannot be passed to the scanner"))
    })?;
    if pattern.is_empty() {
        return Err(ScanError::InvalidRequest("empty scan pattern".to_owned()));
    }

    let mut args = vec![
        "-mode".to_owned(),
        flag.to_owned(),
        "-json".to_owned(),
        "-db".to_owned(),
        db_uri.to_owned(),
    ];
    if let Some(dir) = dir {
        args.push("-C".to_owned());
        args.push(dir.display().to_string());
    }
    args.push(pattern.to_owned());
    Ok(args)
}

/// 스캔 한 번의 자원 사용량
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    /// 스캔 소요 시간 (초)
    pub scan_seconds: f64,
    /// 최대 메모리 (바이트, 측정 불가 플랫폼에서는 0)
    pub peak_memory_bytes: u64,
    /// 바이너리 빌드 시간 (바이너리 모드에서만)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_seconds: Option<f64>,
}

/// 스트림 메시지 처리기
///
/// 메시지 종류마다 하나의 메서드가 호출됩니다. 기본 구현은 무시합니다.
pub trait MessageHandler {
    fn config(&mut self, _config: Config) {}
    fn progress(&mut self, _progress: Progress) {}
    fn sbom(&mut self, _sbom: Sbom) {}
    fn osv(&mut self, _osv: Osv) {}
    fn finding(&mut self, _finding: Finding) {}
}

/// 메시지를 종류별로 처리기에 전달합니다.
pub fn dispatch<H: MessageHandler + ?Sized>(message: Message, handler: &mut H) {
    let Message {
        config,
        progress,
        sbom,
        osv,
        finding,
    } = message;
    let mut handled = false;
    if let Some(config) = config {
        handler.config(config);
        handled = true;
    }
    if let Some(progress) = progress {
        handler.progress(progress);
        handled = true;
    }
    if let Some(sbom) = sbom {
        handler.sbom(sbom);
        handled = true;
    }
    if let Some(osv) = osv {
        handler.osv(osv);
        handled = true;
    }
    if let Some(finding) = finding {
        handler.finding(finding);
        handled = true;
    }
    if !handled {
        debug!("ignoring stream message with no known kind");
    }
}

/// 리더에서 메시지를 증분 디코딩하여 처리기에 전달합니다.
///
/// 첫 메시지는 스트림 전체가 도착하기 전에 처리됩니다.
pub fn decode_stream<R, H>(reader: R, handler: &mut H) -> Result<usize, ScanError>
where
    R: Read,
    H: MessageHandler + ?Sized,
{
    let stream =
        serde_json::Deserializer::from_reader(BufReader::new(reader)).into_iter::<Message>();
    let mut count = 0;
    for item in stream {
        let message = item.map_err(|e| ScanError::Decode(e.to_string()))?;
        dispatch(message, handler);
        count += 1;
    }
    Ok(count)
}

/// 스캔 결과 전체
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanOutput {
    /// 스캔 설정 (도구 버전, DB 수정 시각)
    #[serde(default)]
    pub config: Option<Config>,
    /// 모듈 목록
    #[serde(default)]
    pub sbom: Option<Sbom>,
    /// 참조된 취약점 DB 항목
    #[serde(default)]
    pub osvs: Vec<Osv>,
    /// 원시 발견 항목 (중복 포함)
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// 자원 사용량
    #[serde(default)]
    pub stats: ScanStats,
}

/// 기본 누적기
#[derive(Debug, Default)]
pub struct Collector {
    config: Option<Config>,
    sbom: Option<Sbom>,
    osvs: Vec<Osv>,
    findings: Vec<Finding>,
    progress_messages: usize,
}

impl Collector {
    /// 빈 누적기
    pub fn new() -> Self {
        Self::default()
    }

    /// 받은 진행 메시지 수
    pub fn progress_messages(&self) -> usize {
        self.progress_messages
    }

    /// 통계를 붙여 결과로 변환합니다.
    pub fn into_output(self, stats: ScanStats) -> ScanOutput {
        ScanOutput {
            config: self.config,
            sbom: self.sbom,
            osvs: self.osvs,
            findings: self.findings,
            stats,
        }
    }
}

impl MessageHandler for Collector {
    fn config(&mut self, config: Config) {
        self.config = Some(config);
    }

    fn progress(&mut self, progress: Progress) {
        debug!(message = %progress.message, "scanner progress");
        self.progress_messages += 1;
    }

    fn sbom(&mut self, sbom: Sbom) {
        self.sbom = Some(sbom);
    }

    fn osv(&mut self, osv: Osv) {
        self.osvs.push(osv);
    }

    fn finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }
}

/// 스캔 실행 옵션
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// govulncheck 실행 파일
    pub tool: PathBuf,
    /// 스캔 모드 (`Source` 또는 `Binary`)
    pub mode: ScanMode,
    /// 취약점 DB 경로
    pub db_path: PathBuf,
    /// 작업 디렉토리 (`-C`)
    pub dir: Option<PathBuf>,
    /// 패키지 패턴 또는 바이너리 경로
    pub pattern: String,
    /// 추가 환경변수
    pub env: Vec<(String, String)>,
    /// 자원 측정 전략
    pub probe: Arc<dyn UsageProbe>,
}

impl RunOptions {
    /// 기본 측정 전략으로 옵션을 생성합니다.
    pub fn new(
        tool: impl Into<PathBuf>,
        mode: ScanMode,
        db_path: impl Into<PathBuf>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            mode,
            db_path: db_path.into(),
            dir: None,
            pattern: pattern.into(),
            env: Vec::new(),
            probe: default_probe(),
        }
    }

    /// 작업 디렉토리를 지정합니다.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// 환경변수를 추가합니다.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// 측정 전략을 교체합니다.
    pub fn probe(mut self, probe: Arc<dyn UsageProbe>) -> Self {
        self.probe = probe;
        self
    }
}

/// 도구를 실행하고 메시지를 처리기에 전달합니다.
///
/// 서브프로세스가 끝날 때까지 호출 스레드를 막습니다. 비동기 문맥에서는
/// `spawn_blocking` 안에서 호출해야 합니다.
///
/// # 에러
///
/// - 인자 구성 실패: `InvalidRequest` (프로세스를 시작하지 않음)
/// - 시작 실패: `Start`
/// - 0, 3 이외의 종료 코드: `ToolFailed` (stderr 포함)
/// - 잘못된 JSON: `Decode` (프로세스를 종료시키고 회수한 뒤)
///
/// 종료 코드 에러와 디코딩 에러가 함께 나면 종료 코드 에러가 우선합니다.
pub fn run<H: MessageHandler + ?Sized>(
    opts: &RunOptions,
    handler: &mut H,
) -> Result<ScanStats, ScanError> {
    let args = tool_args(
        opts.mode,
        &db_uri(&opts.db_path)?,
        opts.dir.as_deref(),
        &opts.pattern,
    )?;
    let program = opts.tool.display().to_string();
    debug!(program = %program, args = ?args, "starting scanner");

    let started = Instant::now();
    let mut command = Command::new(&opts.tool);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &opts.env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|source| ScanError::Start {
        program: program.clone(),
        source,
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ScanError::Task("scanner stdout was not captured".to_owned()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ScanError::Task("scanner stderr was not captured".to_owned()))?;

    let stderr_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = BufReader::new(stderr).read_to_end(&mut buf) {
            warn!(error = %e, "failed to read scanner stderr");
        }
        String::from_utf8_lossy(&buf).into_owned()
    });

    let decode_error = decode_stream(stdout, handler).err();
    let mut killed = false;
    if decode_error.is_some() {
        killed = child.kill().is_ok();
    }

    let (status, peak_memory_bytes) =
        opts.probe
            .wait(&mut child)
            .map_err(|source| ScanError::Io {
                path: program.clone(),
                source,
            })?;
    let stderr = stderr_reader.join().unwrap_or_default();

    let stats = ScanStats {
        scan_seconds: started.elapsed().as_secs_f64(),
        peak_memory_bytes,
        build_seconds: None,
    };

    match status.code() {
        Some(0) | Some(FINDINGS_EXIT_CODE) => match decode_error {
            Some(e) => Err(e),
            None => {
                debug!(
                    program = %program,
                    exit_code = status.code(),
                    scan_seconds = stats.scan_seconds,
                    peak_memory_bytes,
                    "scanner finished"
                );
                Ok(stats)
            }
        },
        None if killed => Err(decode_error.unwrap_or_else(|| {
            ScanError::Decode("scanner killed after a decode failure".to_owned())
        })),
        code => Err(ScanError::ToolFailed {
            program,
            code,
            stderr,
        }),
    }
}

/// 기본 누적기로 스캔하여 결과 전체를 반환합니다.
pub fn scan(opts: &RunOptions) -> Result<ScanOutput, ScanError> {
    let mut collector = Collector::new();
    let stats = run(opts, &mut collector)?;
    Ok(collector.into_output(stats))
}
