//! 발견 항목 정규화
//!
//! 스트림의 원시 발견 항목은 같은 취약점 ID에 대해 여러 개가 올 수 있습니다.
//! 여기서는 두 가지 형태로 정리합니다.
//!
//! - [`canonical_findings`]: 취약점 ID당 하나. 호출된 항목이 우선합니다.
//! - [`symbol_rows`]: (취약점, 패키지, 심볼)당 한 행. 호출된 심볼은 `call`,
//!   DB 항목에만 있는 심볼은 `import`, 모듈 수준 발견은 `require`.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::govulncheck::{Finding, Osv};

/// 취약점이 닿는 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// 취약한 심볼을 호출
    Call,
    /// 취약한 패키지를 import만 함
    Import,
    /// 취약한 모듈을 require만 함
    Require,
}

impl SinkKind {
    /// 웨어하우스 레이블
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Import => "import",
            Self::Require => "require",
        }
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 결과 행에 포함되는 취약점 한 건
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VulnRow {
    /// 취약점 ID (GO-YYYY-NNNN)
    pub id: String,
    /// 모듈 경로
    pub module_path: String,
    /// 패키지 경로 (모듈 수준이면 빈 문자열)
    #[serde(default)]
    pub package_path: String,
    /// 심볼 (`Recv.Func`, 없으면 빈 문자열)
    #[serde(default)]
    pub symbol: String,
    /// 닿는 방식
    pub sink: SinkKind,
    /// 호출 여부
    pub called: bool,
}

impl VulnRow {
    /// 정규화된 발견 항목 하나를 행으로 변환합니다.
    pub fn from_finding(finding: &Finding) -> Self {
        let called = finding.is_called();
        let sink = if called {
            SinkKind::Call
        } else if finding.package().is_empty() {
            SinkKind::Require
        } else {
            SinkKind::Import
        };
        Self {
            id: finding.osv.clone(),
            module_path: finding.module().to_owned(),
            package_path: finding.package().to_owned(),
            symbol: finding.symbol(),
            sink,
            called,
        }
    }
}

/// 취약점 ID당 하나의 발견 항목을 고릅니다.
///
/// 저장된 항목이 호출되지 않은 경우에만 새 항목으로 바꿉니다. 따라서 호출된
/// 항목이 한 번이라도 오면 그 항목이 남고, 아니면 마지막 항목이 남습니다.
/// 결과는 ID 순으로 정렬됩니다.
pub fn canonical_findings<I>(findings: I) -> Vec<Finding>
where
    I: IntoIterator<Item = Finding>,
{
    let mut by_id: BTreeMap<String, Finding> = BTreeMap::new();
    for finding in findings {
        match by_id.entry(finding.osv.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(finding);
            }
            Entry::Occupied(mut slot) => {
                if !slot.get().is_called() {
                    slot.insert(finding);
                }
            }
        }
    }
    by_id.into_values().collect()
}

/// 정규화된 발견 항목을 결과 행 목록으로 변환합니다.
pub fn vuln_rows<I>(findings: I) -> Vec<VulnRow>
where
    I: IntoIterator<Item = Finding>,
{
    canonical_findings(findings)
        .iter()
        .map(VulnRow::from_finding)
        .collect()
}

/// (취약점, 패키지)별 누적 상태
#[derive(Default)]
struct PackageGroup<'a> {
    module_path: &'a str,
    called: BTreeSet<String>,
}

/// 심볼 단위 행을 생성합니다.
///
/// (취약점, 패키지)마다:
///
/// 1. 호출된 심볼마다 `call` 행 하나 (중복 제거)
/// 2. DB 항목의 영향 심볼 중 호출되지 않은 것마다 `import` 행 하나
/// 3. 1, 2가 모두 없으면 심볼이 빈 `import` 행 하나
///
/// 패키지가 없는 발견 항목은 취약점당 `require` 행 하나가 됩니다.
/// 행 순서는 (취약점, 패키지) 순이지만 호출자는 집합으로 비교해야 합니다.
pub fn symbol_rows(findings: &[Finding], osvs: &[Osv]) -> Vec<VulnRow> {
    let entries: BTreeMap<&str, &Osv> = osvs.iter().map(|o| (o.id.as_str(), o)).collect();

    let mut groups: BTreeMap<(&str, &str), PackageGroup<'_>> = BTreeMap::new();
    for finding in findings {
        let group = groups
            .entry((finding.osv.as_str(), finding.package()))
            .or_default();
        if group.module_path.is_empty() {
            group.module_path = finding.module();
        }
        if finding.is_called() {
            group.called.insert(finding.symbol());
        }
    }

    let mut rows = Vec::new();
    for ((id, package), group) in groups {
        let row = |symbol: String, sink: SinkKind| VulnRow {
            id: id.to_owned(),
            module_path: group.module_path.to_owned(),
            package_path: package.to_owned(),
            symbol,
            called: sink == SinkKind::Call,
            sink,
        };

        if package.is_empty() {
            rows.push(row(String::new(), SinkKind::Require));
            continue;
        }

        let before = rows.len();
        for symbol in &group.called {
            rows.push(row(symbol.clone(), SinkKind::Call));
        }

        if let Some(osv) = entries.get(id) {
            let mut seen = BTreeSet::new();
            for symbol in osv.affected_symbols(package) {
                if group.called.contains(symbol) || !seen.insert(symbol) {
                    continue;
                }
                rows.push(row(symbol.to_owned(), SinkKind::Import));
            }
        }

        if rows.len() == before {
            rows.push(row(String::new(), SinkKind::Import));
        }
    }
    rows
}

/// 취약점 ID 집합
pub fn osv_ids(rows: &[VulnRow]) -> BTreeSet<String> {
    rows.iter().map(|r| r.id.clone()).collect()
}
