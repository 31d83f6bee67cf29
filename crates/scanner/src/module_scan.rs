//! 모듈 스캔 오케스트레이터
//!
//! [`ModuleScanner`]는 [`ScanTarget`] 하나를 받아 모듈을 다운로드하고,
//! 모드에 따라 스캔한 뒤 결과 행을 만듭니다. [`AnalysisScanner`]는 분석
//! 바이너리에 대해 같은 일을 합니다.
//!
//! # 흐름
//!
//! ```text
//! ScanTarget --> ModuleFetcher --> prepare_module (쓰기 가능한 복사본)
//!                                        |
//!        +-------------------------------+---------------------------+
//!        | source                        | binary                    | compare
//!   vulncheck ./...             build_binaries              build_binaries
//!        |                      vulncheck each binary       per binary: source(import path)
//!        |                               |                           + binary, OSV 차집합
//!        +---------------> Vec<VulnResultRow> <----------------------+
//! ```
//!
//! 스캔 에러는 반환하지 않고 행의 `error`/`error_category`에 기록합니다.
//! 한 바이너리의 빌드/스캔 실패는 다른 바이너리에 영향을 주지 않습니다.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tempfile::TempDir;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use modscan_core::metrics as m;
use modscan_core::storage::{ObjectStore, analysis_binary_path};
use modscan_core::types::ScanMode;
use modscan_core::warehouse::Warehouse;

use crate::build::{BinaryInfo, build_binaries};
use crate::category::ErrorCategory;
use crate::config::{SCHEMA_VERSION, ScannerConfig};
use crate::diagnostics::json_tree_to_diagnostics;
use crate::error::ScanError;
use crate::fetch::{FetchedModule, ModuleFetcher, prepare_module};
use crate::govulncheck::ScanOutput;
use crate::normalize::{osv_ids, vuln_rows};
use crate::request::{AnalysisRequest, ScanTarget};
use crate::rows::{ANALYSIS_TABLE, AnalysisResultRow, VULNCHECK_TABLE, VulnResultRow};
use crate::sandbox::{AnalysisInvocation, DirectExecutor, ScanExecutor, VulncheckInvocation};
use crate::version::{for_sorting, is_canonical};
use crate::work_version::{WorkKey, WorkVersion, WorkVersionTracker, binary_hash};

/// 취약점 DB 인덱스 메타데이터 (`index/db.json`)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DbIndex {
    modified: Option<DateTime<Utc>>,
}

/// 도구 버전을 읽습니다 (`<tool> -version`의 `Scanner:` 줄).
async fn tool_version(tool: &str) -> Option<String> {
    let output = tokio::process::Command::new(tool)
        .arg("-version")
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_tool_version(&stdout)
}

fn parse_tool_version(output: &str) -> Option<String> {
    let line = output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Scanner:"))?
        .trim();
    let version = line.rsplit_once('@').map_or(line, |(_, v)| v);
    (!version.is_empty()).then(|| version.to_owned())
}

/// 요청 버전을 다운로드 가능한 실제 버전으로 해석합니다.
///
/// SemVer 버전은 그대로 쓰고, `latest` 같은 질의는 fetcher로 확정합니다.
async fn resolve_version<F: ModuleFetcher>(
    fetcher: &F,
    module: &str,
    version: &str,
) -> Result<String, ScanError> {
    if is_canonical(version) {
        return Ok(version.to_owned());
    }
    let fetched = fetcher.fetch(module, version).await?;
    debug!(module, query = version, resolved = %fetched.version, "resolved version query");
    Ok(fetched.version)
}

/// 취약점 DB의 최종 수정 시각
async fn vulndb_last_modified(db_path: &Path) -> Option<DateTime<Utc>> {
    let data = tokio::fs::read(db_path.join("index").join("db.json"))
        .await
        .ok()?;
    serde_json::from_slice::<DbIndex>(&data).ok()?.modified
}

/// 스캔 작업 공간 (드롭 시 삭제)
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(work_dir: &str) -> Result<Self, ScanError> {
        std::fs::create_dir_all(work_dir).map_err(|source| ScanError::Io {
            path: work_dir.to_owned(),
            source,
        })?;
        let dir = tempfile::Builder::new()
            .prefix("modscan-")
            .tempdir_in(work_dir)
            .map_err(|source| ScanError::Io {
                path: work_dir.to_owned(),
                source,
            })?;
        Ok(Self { dir })
    }

    fn module_dir(&self) -> PathBuf {
        self.dir.path().join("module")
    }

    fn bin_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }
}

fn record_row_metrics(row: &VulnResultRow, started: Instant) {
    let result = if row.has_error() { "error" } else { "success" };
    metrics::counter!(
        m::SCANNER_SCANS_TOTAL,
        m::LABEL_MODE => row.scan_mode.clone(),
        m::LABEL_RESULT => result
    )
    .increment(1);
    metrics::histogram!(m::SCANNER_SCAN_DURATION_SECONDS, m::LABEL_MODE => row.scan_mode.clone())
        .record(started.elapsed().as_secs_f64());
    if row.stats.peak_memory_bytes > 0 {
        // u64 -> f64 변환은 히스토그램 기록용
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!(m::SCANNER_PEAK_MEMORY_BYTES)
            .record(row.stats.peak_memory_bytes as f64);
    }
    metrics::counter!(m::SCANNER_FINDINGS_TOTAL)
        .increment(u64::try_from(row.vulns.len()).unwrap_or(u64::MAX));
    if row.has_error() {
        metrics::counter!(m::SCANNER_ERRORS_TOTAL, m::LABEL_CATEGORY => row.error_category.clone())
            .increment(1);
    }
}

/// 모듈 취약점 스캐너
///
/// `ModuleScannerBuilder`로 생성합니다. 동시에 여러 태스크에서 공유해도
/// 안전합니다 (내부 가변 상태는 도구 버전 캐시뿐).
pub struct ModuleScanner<E, F> {
    config: ScannerConfig,
    executor: E,
    direct: DirectExecutor,
    fetcher: F,
    tool_version: OnceCell<String>,
}

impl<E: ScanExecutor, F: ModuleFetcher> ModuleScanner<E, F> {
    /// 스캐너 설정
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// 실행기 이름
    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// 현재 코드의 작업 버전
    ///
    /// 도구 버전은 처음 호출 시 한 번만 읽고, 취약점 DB 수정 시각은 DB가
    /// 실행 중에 갱신될 수 있으므로 매번 읽습니다.
    pub async fn current_work_version(&self) -> WorkVersion {
        let tool_version = self
            .tool_version
            .get_or_init(|| async {
                let version = tool_version(&self.config.tool_path)
                    .await
                    .unwrap_or_default();
                if version.is_empty() {
                    warn!(tool = %self.config.tool_path, "could not determine scanner version");
                }
                version
            })
            .await
            .clone();
        WorkVersion {
            tool_version,
            worker_version: self.config.worker_version.clone(),
            schema_version: SCHEMA_VERSION.to_owned(),
            vulndb_last_modified: vulndb_last_modified(Path::new(&self.config.vuln_db_path)).await,
            binary_hash: None,
        }
    }

    /// 이전 결과가 현재 작업 버전과 같은지 확인합니다.
    ///
    /// 소스 모드만 판단하며, 바이너리/비교 모드는 항상 `false`입니다.
    /// `latest` 같은 버전 질의는 실제 버전으로 해석한 뒤 비교합니다.
    pub async fn is_current<W: Warehouse>(
        &self,
        warehouse: &W,
        target: &ScanTarget,
    ) -> Result<bool, ScanError> {
        if target.mode() != ScanMode::Source {
            return Ok(false);
        }
        let version = resolve_version(&self.fetcher, target.module(), target.version()).await?;
        let key = WorkKey::module(target.module(), for_sorting(&version));
        let query = WorkVersionTracker::query(VULNCHECK_TABLE, std::slice::from_ref(&key))
            .filter_eq("scan_mode", ScanMode::Source.as_str());
        let tracker = WorkVersionTracker::load_query(warehouse, &query).await?;
        let current = self.current_work_version().await;
        Ok(!tracker.should_scan(&key, &current))
    }

    /// 대상 하나를 스캔합니다. 에러는 행에 기록됩니다.
    pub async fn scan(&self, target: &ScanTarget) -> Vec<VulnResultRow> {
        let started = Instant::now();
        let rows = self.scan_rows(target).await;
        for row in &rows {
            record_row_metrics(row, started);
            if row.has_error() {
                warn!(
                    target = %target,
                    binary = %row.binary_name,
                    category = %row.error_category,
                    error = %row.error,
                    "scan failed"
                );
            } else {
                info!(
                    target = %target,
                    binary = %row.binary_name,
                    vulns = row.vulns.len(),
                    scan_seconds = row.stats.scan_seconds,
                    "scan completed"
                );
            }
        }
        rows
    }

    async fn scan_rows(&self, target: &ScanTarget) -> Vec<VulnResultRow> {
        let mode = target.mode();
        let mut base = VulnResultRow::new(target.module(), target.version(), mode.as_str());
        base.imported_by = target.imported_by();
        base.work_version = self.current_work_version().await;

        let fetched = match self.fetcher.fetch(target.module(), target.version()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                base.set_error(&e);
                return vec![base];
            }
        };
        base.set_version(&fetched.version);
        base.commit_time = fetched.time;

        let workspace = match self.prepare(&fetched, true).await {
            Ok(workspace) => workspace,
            Err(e) => {
                base.set_error(&e);
                return vec![base];
            }
        };

        match mode {
            ScanMode::Source => {
                let pattern = if target.suffix().is_empty() {
                    "./...".to_owned()
                } else {
                    format!("./{}", target.suffix())
                };
                let invocation = self.invocation(ScanMode::Source, Some(workspace.module_dir()), pattern);
                let mut row = base;
                match self.vulncheck(target.insecure(), invocation).await {
                    Ok(output) => fill_row(&mut row, output),
                    Err(e) => row.set_error(&e),
                }
                vec![row]
            }
            ScanMode::Binary | ScanMode::Compare => {
                self.binary_rows(base, target, &workspace).await
            }
        }
    }

    async fn binary_rows(
        &self,
        mut base: VulnResultRow,
        target: &ScanTarget,
        workspace: &Workspace,
    ) -> Vec<VulnResultRow> {
        let go = PathBuf::from(&self.config.go_path);
        let module_dir = workspace.module_dir();
        let bin_dir = workspace.bin_dir();
        let built = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&bin_dir).map_err(|source| ScanError::Io {
                path: bin_dir.display().to_string(),
                source,
            })?;
            build_binaries(&go, &module_dir, &bin_dir)
        })
        .await
        .map_err(|e| ScanError::Task(e.to_string()))
        .and_then(|r| r);

        let binaries = match built {
            Ok(binaries) if binaries.is_empty() => {
                base.set_error(&ScanError::InvalidRequest(
                    "module has no main packages".to_owned(),
                ));
                return vec![base];
            }
            Ok(binaries) => binaries,
            Err(e) => {
                base.set_error(&e);
                return vec![base];
            }
        };
        debug!(target = %target, binaries = binaries.len(), "built binaries");

        let mut rows = Vec::with_capacity(binaries.len());
        for binary in &binaries {
            rows.push(
                self.binary_row(base.clone(), target, &workspace.module_dir(), binary)
                    .await,
            );
        }
        rows
    }

    async fn binary_row(
        &self,
        mut row: VulnResultRow,
        target: &ScanTarget,
        module_dir: &Path,
        binary: &BinaryInfo,
    ) -> VulnResultRow {
        row.binary_name = binary.name();
        let build_seconds = Some(binary.build_duration.as_secs_f64());
        row.stats.build_seconds = build_seconds;

        if let Some(error) = &binary.build_error {
            row.error = format!("building {}: {error}", binary.import_path);
            row.error_category = ErrorCategory::Build.as_str().to_owned();
            return row;
        }

        let binary_scan = self
            .vulncheck(
                target.insecure(),
                self.invocation(
                    ScanMode::Binary,
                    None,
                    binary.binary_path.display().to_string(),
                ),
            )
            .await;

        if target.mode() == ScanMode::Compare {
            let source_scan = self
                .vulncheck(
                    target.insecure(),
                    self.invocation(
                        ScanMode::Source,
                        Some(module_dir.to_path_buf()),
                        binary.import_path.clone(),
                    ),
                )
                .await;
            match (binary_scan, source_scan) {
                (Ok(binary_out), Ok(source_out)) => {
                    let source_ids = osv_ids(&vuln_rows(source_out.findings));
                    fill_row(&mut row, binary_out);
                    let binary_ids = osv_ids(&row.vulns);
                    row.source_only = source_ids.difference(&binary_ids).cloned().collect();
                    row.binary_only = binary_ids.difference(&source_ids).cloned().collect();
                }
                (Err(e), _) | (_, Err(e)) => row.set_error(&e),
            }
        } else {
            match binary_scan {
                Ok(output) => fill_row(&mut row, output),
                Err(e) => row.set_error(&e),
            }
        }
        row.stats.build_seconds = build_seconds;
        row
    }

    async fn prepare(
        &self,
        fetched: &FetchedModule,
        download_deps: bool,
    ) -> Result<Workspace, ScanError> {
        let workspace = Workspace::new(&self.config.work_dir)?;
        prepare_module(
            Path::new(&self.config.go_path),
            &fetched.dir,
            &workspace.module_dir(),
            download_deps,
        )
        .await?;
        Ok(workspace)
    }

    fn invocation(&self, mode: ScanMode, dir: Option<PathBuf>, pattern: String) -> VulncheckInvocation {
        VulncheckInvocation {
            tool: PathBuf::from(&self.config.tool_path),
            mode,
            db_path: PathBuf::from(&self.config.vuln_db_path),
            dir,
            pattern,
        }
    }

    async fn vulncheck(
        &self,
        insecure: bool,
        invocation: VulncheckInvocation,
    ) -> Result<ScanOutput, ScanError> {
        if insecure {
            self.direct.vulncheck(invocation).await
        } else {
            self.executor.vulncheck(invocation).await
        }
    }
}

fn fill_row(row: &mut VulnResultRow, output: ScanOutput) {
    row.vulns = vuln_rows(output.findings);
    row.stats = output.stats;
}

/// [`ModuleScanner`] 빌더
pub struct ModuleScannerBuilder<E, F> {
    config: ScannerConfig,
    executor: Option<E>,
    fetcher: Option<F>,
}

impl<E: ScanExecutor, F: ModuleFetcher> ModuleScannerBuilder<E, F> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: ScannerConfig::default(),
            executor: None,
            fetcher: None,
        }
    }

    /// 스캐너 설정을 지정합니다.
    pub fn config(mut self, config: ScannerConfig) -> Self {
        self.config = config;
        self
    }

    /// 실행기를 지정합니다.
    pub fn executor(mut self, executor: E) -> Self {
        self.executor = Some(executor);
        self
    }

    /// 모듈 공급원을 지정합니다.
    pub fn fetcher(mut self, fetcher: F) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// 스캐너를 빌드합니다.
    ///
    /// # Errors
    ///
    /// 설정 검증 실패, 실행기 또는 공급원 누락 시 `ScanError::Config`
    pub fn build(self) -> Result<ModuleScanner<E, F>, ScanError> {
        self.config.validate()?;
        let executor = self.executor.ok_or_else(|| ScanError::Config {
            field: "executor".to_owned(),
            reason: "no scan executor configured".to_owned(),
        })?;
        let fetcher = self.fetcher.ok_or_else(|| ScanError::Config {
            field: "fetcher".to_owned(),
            reason: "no module fetcher configured".to_owned(),
        })?;
        Ok(ModuleScanner {
            config: self.config,
            executor,
            direct: DirectExecutor::new(),
            fetcher,
            tool_version: OnceCell::new(),
        })
    }
}

impl<E: ScanExecutor, F: ModuleFetcher> Default for ModuleScannerBuilder<E, F> {
    fn default() -> Self {
        Self::new()
    }
}

/// 로컬에 내려받은 분석 바이너리 (드롭 시 삭제)
#[derive(Debug)]
pub struct PreparedBinary {
    _dir: TempDir,
    path: PathBuf,
    hash: String,
}

impl PreparedBinary {
    /// 실행 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 바이너리와 인자의 해시
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// 분석 바이너리 스캐너
pub struct AnalysisScanner<E, F, S> {
    config: ScannerConfig,
    executor: E,
    direct: DirectExecutor,
    fetcher: F,
    store: S,
}

impl<E: ScanExecutor, F: ModuleFetcher, S: ObjectStore> AnalysisScanner<E, F, S> {
    /// 스캐너를 생성합니다. 설정을 검증합니다.
    pub fn new(config: ScannerConfig, executor: E, fetcher: F, store: S) -> Result<Self, ScanError> {
        config.validate()?;
        Ok(Self {
            config,
            executor,
            direct: DirectExecutor::new(),
            fetcher,
            store,
        })
    }

    /// 오브젝트 스토어
    pub fn store(&self) -> &S {
        &self.store
    }

    /// 분석 바이너리를 작업 디렉토리에 내려받고 해시를 계산합니다.
    pub async fn prepare_binary(&self, req: &AnalysisRequest) -> Result<PreparedBinary, ScanError> {
        let name = analysis_binary_path(&req.binary);
        let data = self
            .store
            .read(&name)
            .await
            .map_err(|e| ScanError::Fetch {
                module: name.clone(),
                reason: e.to_string(),
            })?;

        let workspace = Workspace::new(&self.config.work_dir)?;
        let path = workspace.dir.path().join(&req.binary);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|source| ScanError::Io {
                path: path.display().to_string(),
                source,
            })?;
        make_executable(&path).await?;
        let hash = binary_hash(&path, &req.args).await?;

        Ok(PreparedBinary {
            _dir: workspace.dir,
            path,
            hash,
        })
    }

    /// 요청의 현재 작업 버전
    pub fn work_version(&self, req: &AnalysisRequest, binary: &PreparedBinary) -> WorkVersion {
        WorkVersion {
            tool_version: req.binary.clone(),
            worker_version: self.config.worker_version.clone(),
            schema_version: SCHEMA_VERSION.to_owned(),
            vulndb_last_modified: None,
            binary_hash: Some(binary.hash.clone()),
        }
    }

    /// 이전 결과가 현재 작업 버전과 같은지 확인합니다.
    pub async fn is_current<W: Warehouse>(
        &self,
        warehouse: &W,
        req: &AnalysisRequest,
        binary: &PreparedBinary,
    ) -> Result<bool, ScanError> {
        let version = resolve_version(&self.fetcher, &req.module, &req.version).await?;
        let key = WorkKey::binary(&req.module, for_sorting(&version), &req.binary);
        let tracker =
            WorkVersionTracker::load(warehouse, ANALYSIS_TABLE, std::slice::from_ref(&key)).await?;
        Ok(!tracker.should_scan(&key, &self.work_version(req, binary)))
    }

    /// 준비된 바이너리로 모듈을 분석합니다. 에러는 행에 기록됩니다.
    pub async fn scan(&self, req: &AnalysisRequest, binary: &PreparedBinary) -> AnalysisResultRow {
        let mut row = AnalysisResultRow::new(&req.module, &req.version, &req.binary, &req.args);
        row.job_id = req.job_id.clone().unwrap_or_default();
        row.work_version = self.work_version(req, binary);

        let started = Instant::now();
        if let Err(e) = self.scan_into(&mut row, req, binary).await {
            row.set_error(&e);
        }

        let result = if row.has_error() { "error" } else { "success" };
        metrics::counter!(m::SCANNER_SCANS_TOTAL, m::LABEL_MODE => "analysis", m::LABEL_RESULT => result)
            .increment(1);
        metrics::histogram!(m::SCANNER_SCAN_DURATION_SECONDS, m::LABEL_MODE => "analysis")
            .record(started.elapsed().as_secs_f64());
        if row.has_error() {
            metrics::counter!(m::SCANNER_ERRORS_TOTAL, m::LABEL_CATEGORY => row.error_category.clone())
                .increment(1);
            warn!(module = %req.path(), binary = %req.binary, error = %row.error, "analysis failed");
        } else {
            info!(
                module = %req.path(),
                binary = %req.binary,
                diagnostics = row.diagnostics.len(),
                "analysis completed"
            );
        }
        row
    }

    /// 바이너리 준비부터 분석까지 한 번에 실행합니다.
    pub async fn scan_request(&self, req: &AnalysisRequest) -> AnalysisResultRow {
        match self.prepare_binary(req).await {
            Ok(binary) => self.scan(req, &binary).await,
            Err(e) => {
                let mut row =
                    AnalysisResultRow::new(&req.module, &req.version, &req.binary, &req.args);
                row.job_id = req.job_id.clone().unwrap_or_default();
                row.set_error(&e);
                row
            }
        }
    }

    async fn scan_into(
        &self,
        row: &mut AnalysisResultRow,
        req: &AnalysisRequest,
        binary: &PreparedBinary,
    ) -> Result<(), ScanError> {
        let fetched = self.fetcher.fetch(&req.module, &req.version).await?;
        row.set_version(&fetched.version);
        row.commit_time = fetched.time;

        let workspace = Workspace::new(&self.config.work_dir)?;
        prepare_module(
            Path::new(&self.config.go_path),
            &fetched.dir,
            &workspace.module_dir(),
            !req.no_deps,
        )
        .await?;

        let invocation = AnalysisInvocation {
            binary: binary.path.clone(),
            dir: workspace.module_dir(),
            args: req.args.clone(),
        };
        let tree = if req.insecure {
            self.direct.analysis(invocation).await?
        } else {
            self.executor.analysis(invocation).await?
        };
        row.diagnostics = json_tree_to_diagnostics(&tree);
        Ok(())
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), ScanError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|source| ScanError::Io {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), ScanError> {
    Ok(())
}
