//! govulncheck `-json` 스트림 메시지 타입
//!
//! 스트림은 JSON 객체의 연속이며, 각 객체는 아래 키 중 정확히 하나를 가집니다.
//! `config`, `progress`, `SBOM`, `osv`, `finding`.
//!
//! 알 수 없는 필드는 무시하고, 빠진 필드는 기본값으로 채웁니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 스트림 메시지 한 개
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// 스캔 설정
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Config>,
    /// 진행 상황
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    /// 모듈 목록
    #[serde(default, rename = "SBOM", skip_serializing_if = "Option::is_none")]
    pub sbom: Option<Sbom>,
    /// 취약점 DB 항목
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osv: Option<Osv>,
    /// 발견 항목
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding: Option<Finding>,
}

/// 스캔 설정 메시지
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub protocol_version: String,
    pub scanner_name: String,
    pub scanner_version: String,
    pub db: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_last_modified: Option<DateTime<Utc>>,
    pub go_version: String,
    pub scan_level: String,
    pub scan_mode: String,
}

/// 진행 상황 메시지
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub message: String,
}

/// 모듈 목록 메시지
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sbom {
    pub go_version: String,
    pub modules: Vec<SbomModule>,
    pub roots: Vec<String>,
}

/// 모듈 목록의 항목
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SbomModule {
    pub path: String,
    pub version: String,
}

/// OSV 형식 취약점 항목 (필요한 필드만)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Osv {
    pub id: String,
    pub aliases: Vec<String>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    pub affected: Vec<Affected>,
}

impl Osv {
    /// 패키지의 영향받는 심볼 목록 (중복 제거 전, 등장 순서)
    pub fn affected_symbols<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.affected
            .iter()
            .flat_map(|a| a.ecosystem_specific.imports.iter())
            .filter(move |imp| imp.path == package)
            .flat_map(|imp| imp.symbols.iter().map(String::as_str))
    }
}

/// 영향받는 모듈
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Affected {
    pub module: AffectedModule,
    pub ecosystem_specific: EcosystemSpecific,
}

/// 영향받는 모듈 식별자
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectedModule {
    pub path: String,
    pub ecosystem: String,
}

/// Go 생태계 전용 필드
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcosystemSpecific {
    pub imports: Vec<AffectedPackage>,
}

/// 영향받는 패키지와 심볼
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectedPackage {
    pub path: String,
    pub goos: Vec<String>,
    pub goarch: Vec<String>,
    pub symbols: Vec<String>,
}

/// 발견 항목
///
/// `trace[0]`은 취약한 심볼 쪽 프레임입니다. 모듈 수준 발견은 `package`가,
/// 패키지 수준 발견은 `function`이 비어 있습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Finding {
    pub osv: String,
    pub fixed_version: String,
    pub trace: Vec<Frame>,
}

impl Finding {
    /// 취약한 심볼이 실제로 호출되는지 여부.
    ///
    /// 첫 프레임의 `function`이 비어있지 않으면 호출된 것으로 봅니다.
    pub fn is_called(&self) -> bool {
        self.trace.first().is_some_and(|f| !f.function.is_empty())
    }

    /// 취약한 쪽 프레임
    pub fn vulnerable_frame(&self) -> Option<&Frame> {
        self.trace.first()
    }

    /// 모듈 경로
    pub fn module(&self) -> &str {
        self.trace.first().map(|f| f.module.as_str()).unwrap_or_default()
    }

    /// 패키지 경로 (모듈 수준 발견이면 빈 문자열)
    pub fn package(&self) -> &str {
        self.trace.first().map(|f| f.package.as_str()).unwrap_or_default()
    }

    /// 심볼 이름 (`Recv.Func` 또는 `Func`)
    pub fn symbol(&self) -> String {
        self.trace.first().map(Frame::symbol).unwrap_or_default()
    }
}

/// 호출 스택 프레임
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frame {
    pub module: String,
    pub version: String,
    pub package: String,
    pub function: String,
    pub receiver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Frame {
    /// 리시버가 있으면 `Recv.Func`, 없으면 `Func`. 포인터 표시 `*`는 제거합니다.
    pub fn symbol(&self) -> String {
        if self.function.is_empty() {
            return String::new();
        }
        let receiver = self.receiver.trim_start_matches('*');
        if receiver.is_empty() {
            self.function.clone()
        } else {
            format!("{receiver}.{}", self.function)
        }
    }
}

/// 소스 위치
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub filename: String,
    pub offset: u64,
    pub line: u64,
    pub column: u64,
}
