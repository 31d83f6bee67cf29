//! 도메인 타입 — 크레이트 전역에서 사용되는 공통 타입
//!
//! 스캐너, 작업 추적기, 데몬이 공유하는 데이터 구조를 정의합니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 스캔 모드
///
/// `Source`와 `Binary`만 govulncheck의 `-mode` 플래그로 전달됩니다.
/// `Compare`는 같은 패키지를 두 모드로 스캔한 뒤 결과를 비교합니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// 소스 코드 분석
    #[default]
    Source,
    /// 빌드된 바이너리 분석
    Binary,
    /// 바이너리 vs 소스 비교
    Compare,
}

impl ScanMode {
    /// 문자열에서 스캔 모드를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "source" | "src" => Some(Self::Source),
            "binary" | "bin" => Some(Self::Binary),
            "compare" => Some(Self::Compare),
            _ => None,
        }
    }

    /// 웨어하우스/쿼리 문자열 표현
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Binary => "binary",
            Self::Compare => "compare",
        }
    }

    /// govulncheck `-mode` 값. `Compare`는 단일 실행 모드가 아니므로 `None`.
    pub fn tool_flag(self) -> Option<&'static str> {
        match self {
            Self::Source => Some("source"),
            Self::Binary => Some("binary"),
            Self::Compare => None,
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_loose(s).ok_or_else(|| format!("unknown scan mode '{s}'"))
    }
}

/// 모듈 경로 + 버전 쌍
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleVersion {
    /// 모듈 경로 (예: `golang.org/x/text`)
    pub path: String,
    /// 버전 (예: `v0.3.7`)
    pub version: String,
}

impl ModuleVersion {
    /// 새 모듈 버전을 생성합니다.
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.version)
    }
}
