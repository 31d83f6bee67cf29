//! 스캔 에러 분류
//!
//! 도구의 stderr나 에러 메시지를 집계용 범주로 나눕니다. 정해진 순서로
//! 패턴을 검사하며 처음 일치한 범주를 사용합니다. 완전한 분류는 아닙니다.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, ScanError};

/// 에러 범주
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// 취약점 DB 접근 실패
    VulnDb,
    /// go.mod 없음
    MissingGoMod,
    /// go.sum 항목 없음
    MissingGoSum,
    /// Go 버전 불일치
    GoVersion,
    /// 패키지 로드 실패
    Load,
    /// OS 수준 실패
    Os,
    /// 도구 패닉
    Panic,
    /// 메모리 제한 초과
    MemoryLimit,
    /// 바이너리 빌드 실패
    Build,
    /// 시간 제한 초과
    Timeout,
    /// 그 외
    Other,
}

impl ErrorCategory {
    /// 웨어하우스 레이블
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VulnDb => "VULNDB",
            Self::MissingGoMod => "MISSING GO.MOD",
            Self::MissingGoSum => "MISSING GO.SUM",
            Self::GoVersion => "GO VERSION",
            Self::Load => "LOAD",
            Self::Os => "OS",
            Self::Panic => "PANIC",
            Self::MemoryLimit => "MEMORY LIMIT",
            Self::Build => "BUILD",
            Self::Timeout => "TIMEOUT",
            Self::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static PATTERNS: LazyLock<Vec<(ErrorCategory, Regex)>> = LazyLock::new(|| {
    [
        (
            ErrorCategory::VulnDb,
            r"vulnerability database|vuln(?:erability)? ?db|fetching vulnerabilities",
        ),
        (
            ErrorCategory::MissingGoMod,
            r"go\.mod file not found|no go\.mod|cannot find main module",
        ),
        (ErrorCategory::MissingGoSum, r"missing go\.sum entry"),
        (
            ErrorCategory::GoVersion,
            r"requires go\s*>?=?\s*\d|go version .* not supported|unsupported go version|toolchain",
        ),
        (
            ErrorCategory::Load,
            r"loading packages|packages contain errors|matched no packages|no required module provides",
        ),
        (
            ErrorCategory::Os,
            r"no space left on device|permission denied|too many open files|read-only file system",
        ),
        (ErrorCategory::Panic, r"panic:"),
        (
            ErrorCategory::MemoryLimit,
            r"memory limit|out of memory|cannot allocate memory|signal: killed",
        ),
        (ErrorCategory::Build, r"build failed|go build|undefined:"),
        (
            ErrorCategory::Timeout,
            r"deadline exceeded|timed out|timeout",
        ),
    ]
    .into_iter()
    .filter_map(|(category, pattern)| {
        Regex::new(&format!("(?i){pattern}"))
            .ok()
            .map(|re| (category, re))
    })
    .collect()
});

/// 메시지를 분류합니다. 일치하는 패턴이 없으면 [`ErrorCategory::Other`].
pub fn categorize(message: &str) -> ErrorCategory {
    PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(message))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Other)
}

/// 스캔 에러를 분류합니다.
///
/// 도구 실패는 stderr로 분류하며, 출력 없이 시그널로 종료된 경우는
/// 메모리 제한으로 봅니다.
pub fn categorize_error(err: &ScanError) -> ErrorCategory {
    match err {
        ScanError::Sandbox(SandboxError::Timeout { .. }) => ErrorCategory::Timeout,
        ScanError::ToolFailed { code, stderr, .. } => match categorize(stderr) {
            ErrorCategory::Other if code.is_none() => ErrorCategory::MemoryLimit,
            category => category,
        },
        ScanError::GoCommand { stderr, .. } => categorize(stderr),
        other => categorize(&other.to_string()),
    }
}
