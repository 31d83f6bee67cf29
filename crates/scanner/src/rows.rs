//! 웨어하우스 결과 행과 테이블 스키마
//!
//! 결과 행은 추가 전용입니다. "최신" 결과는 조회 시점에
//! (module_path, sortable_version[, binary_name]) 파티션의 `created_at`
//! 내림차순 첫 행으로 정합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use modscan_core::warehouse::{FieldKind, FieldSchema, Row, TableSchema};

use crate::category::categorize_error;
use crate::diagnostics::DiagnosticRow;
use crate::error::ScanError;
use crate::govulncheck::ScanStats;
use crate::normalize::VulnRow;
use crate::version::for_sorting;
use crate::work_version::{WorkKey, WorkVersion};

/// 취약점 스캔 결과 테이블
pub const VULNCHECK_TABLE: &str = "vulncheck_results";

/// 분석 결과 테이블
pub const ANALYSIS_TABLE: &str = "analysis_results";

/// 취약점 스캔 결과 행
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnResultRow {
    /// 업로드 시각
    pub created_at: DateTime<Utc>,
    /// 모듈 경로
    pub module_path: String,
    /// 버전
    pub version: String,
    /// 정렬 가능한 버전
    pub sortable_version: String,
    /// 모듈 커밋 시각
    pub commit_time: Option<DateTime<Utc>>,
    /// import 수
    pub imported_by: u64,
    /// 스캔 모드 (`source`, `binary`, `compare`)
    pub scan_mode: String,
    /// 바이너리 이름 (바이너리/비교 모드)
    pub binary_name: String,
    /// 에러 메시지 (성공이면 빈 문자열)
    pub error: String,
    /// 에러 범주
    pub error_category: String,
    /// 자원 사용량
    pub stats: ScanStats,
    /// 작업 버전
    pub work_version: WorkVersion,
    /// 취약점 목록
    pub vulns: Vec<VulnRow>,
    /// 비교 모드: 소스 스캔에서만 발견된 취약점 ID
    pub source_only: Vec<String>,
    /// 비교 모드: 바이너리 스캔에서만 발견된 취약점 ID
    pub binary_only: Vec<String>,
}

impl VulnResultRow {
    /// 모듈 식별 정보만 채운 행
    pub fn new(module_path: &str, version: &str, scan_mode: &str) -> Self {
        Self {
            created_at: Utc::now(),
            module_path: module_path.to_owned(),
            version: version.to_owned(),
            sortable_version: for_sorting(version),
            scan_mode: scan_mode.to_owned(),
            ..Self::default()
        }
    }

    /// 다운로드로 확정된 버전을 기록합니다 (`latest` 등 질의 해석 결과).
    pub fn set_version(&mut self, version: &str) {
        self.version = version.to_owned();
        self.sortable_version = for_sorting(version);
    }

    /// 에러와 범주를 기록합니다.
    pub fn set_error(&mut self, err: &ScanError) {
        self.error = err.to_string();
        self.error_category = categorize_error(err).as_str().to_owned();
    }

    /// 에러가 기록되었는지 여부
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// 작업 버전 파티션 키
    pub fn work_key(&self) -> WorkKey {
        WorkKey {
            module_path: self.module_path.clone(),
            sortable_version: self.sortable_version.clone(),
            binary_name: (!self.binary_name.is_empty()).then(|| self.binary_name.clone()),
        }
    }
}

impl Row for VulnResultRow {
    fn set_upload_time(&mut self, time: DateTime<Utc>) {
        self.created_at = time;
    }
}

/// 분석 결과 행
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResultRow {
    /// 업로드 시각
    pub created_at: DateTime<Utc>,
    /// 모듈 경로
    pub module_path: String,
    /// 버전
    pub version: String,
    /// 정렬 가능한 버전
    pub sortable_version: String,
    /// 모듈 커밋 시각
    pub commit_time: Option<DateTime<Utc>>,
    /// 소속 Job ID
    pub job_id: String,
    /// 분석 바이너리 이름
    pub binary_name: String,
    /// 분석 바이너리 인자
    pub binary_args: Vec<String>,
    /// 작업 버전 (바이너리 해시 포함)
    pub work_version: WorkVersion,
    /// 진단 목록
    pub diagnostics: Vec<DiagnosticRow>,
    /// 에러 메시지
    pub error: String,
    /// 에러 범주
    pub error_category: String,
}

impl AnalysisResultRow {
    /// 요청 식별 정보만 채운 행
    pub fn new(module_path: &str, version: &str, binary_name: &str, args: &[String]) -> Self {
        Self {
            created_at: Utc::now(),
            module_path: module_path.to_owned(),
            version: version.to_owned(),
            sortable_version: for_sorting(version),
            binary_name: binary_name.to_owned(),
            binary_args: args.to_vec(),
            ..Self::default()
        }
    }

    /// 다운로드로 확정된 버전을 기록합니다 (`latest` 등 질의 해석 결과).
    pub fn set_version(&mut self, version: &str) {
        self.version = version.to_owned();
        self.sortable_version = for_sorting(version);
    }

    /// 에러와 범주를 기록합니다.
    pub fn set_error(&mut self, err: &ScanError) {
        self.error = err.to_string();
        self.error_category = categorize_error(err).as_str().to_owned();
    }

    /// 에러가 기록되었는지 여부
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

impl Row for AnalysisResultRow {
    fn set_upload_time(&mut self, time: DateTime<Utc>) {
        self.created_at = time;
    }
}

fn string(name: &str) -> FieldSchema {
    FieldSchema::new(name, FieldKind::String)
}

fn work_version_field() -> FieldSchema {
    FieldSchema::new(
        "work_version",
        FieldKind::Record(vec![
            string("tool_version"),
            string("worker_version"),
            string("schema_version"),
            FieldSchema::new("vulndb_last_modified", FieldKind::Timestamp),
            string("binary_hash"),
        ]),
    )
}

/// 취약점 스캔 결과 테이블 스키마
pub fn vulncheck_schema() -> TableSchema {
    TableSchema::new(
        VULNCHECK_TABLE,
        vec![
            FieldSchema::new("created_at", FieldKind::Timestamp),
            string("module_path"),
            string("version"),
            string("sortable_version"),
            FieldSchema::new("commit_time", FieldKind::Timestamp),
            FieldSchema::new("imported_by", FieldKind::Integer),
            string("scan_mode"),
            string("binary_name"),
            string("error"),
            string("error_category"),
            FieldSchema::new(
                "stats",
                FieldKind::Record(vec![
                    FieldSchema::new("scan_seconds", FieldKind::Float),
                    FieldSchema::new("peak_memory_bytes", FieldKind::Integer),
                    FieldSchema::new("build_seconds", FieldKind::Float),
                ]),
            ),
            work_version_field(),
            FieldSchema::repeated(
                "vulns",
                FieldKind::Record(vec![
                    string("id"),
                    string("module_path"),
                    string("package_path"),
                    string("symbol"),
                    string("sink"),
                    FieldSchema::new("called", FieldKind::Boolean),
                ]),
            ),
            FieldSchema::repeated("source_only", FieldKind::String),
            FieldSchema::repeated("binary_only", FieldKind::String),
        ],
    )
}

/// 분석 결과 테이블 스키마
pub fn analysis_schema() -> TableSchema {
    TableSchema::new(
        ANALYSIS_TABLE,
        vec![
            FieldSchema::new("created_at", FieldKind::Timestamp),
            string("module_path"),
            string("version"),
            string("sortable_version"),
            FieldSchema::new("commit_time", FieldKind::Timestamp),
            string("job_id"),
            string("binary_name"),
            FieldSchema::repeated("binary_args", FieldKind::String),
            work_version_field(),
            FieldSchema::repeated(
                "diagnostics",
                FieldKind::Record(vec![
                    string("package_id"),
                    string("analyzer_name"),
                    string("error"),
                    string("category"),
                    string("position"),
                    string("message"),
                ]),
            ),
            string("error"),
            string("error_category"),
        ],
    )
}

/// 스캐너가 쓰는 모든 테이블
pub fn tables() -> Vec<TableSchema> {
    vec![vulncheck_schema(), analysis_schema()]
}
