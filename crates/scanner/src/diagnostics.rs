//! 분석 바이너리 JSON 트리 평탄화
//!
//! `go/analysis` 기반 바이너리는 `-json` 플래그로 다음 형태의 트리를 출력합니다.
//!
//! ```text
//! {
//!   "<package id>": {
//!     "<analyzer>": [ { "category", "posn", "message" }, ... ]
//!     "<analyzer>": { "error": "..." }
//!   }
//! }
//! ```
//!
//! [`json_tree_to_diagnostics`]는 이를 패키지 ID, 분석기 이름 순으로 정렬된
//! 평평한 행 목록으로 바꿉니다. 같은 입력에 대해 항상 같은 출력을 냅니다.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// 패키지 ID -> 분석기 이름 -> 결과
pub type JsonTree = BTreeMap<String, BTreeMap<String, AnalyzerResult>>;

/// 분석기 하나의 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalyzerResult {
    /// 분석기 실패
    Error {
        /// 에러 메시지
        error: String,
    },
    /// 진단 목록
    Diagnostics(Vec<JsonDiagnostic>),
}

/// 진단 한 건
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonDiagnostic {
    pub category: String,
    pub posn: String,
    pub message: String,
}

/// 평탄화된 진단 행
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticRow {
    /// 패키지 ID
    pub package_id: String,
    /// 분석기 이름
    pub analyzer_name: String,
    /// 분석기 에러 (에러 행에서만)
    pub error: String,
    /// 진단 분류
    pub category: String,
    /// 소스 위치 (`file:line:col`)
    pub position: String,
    /// 메시지
    pub message: String,
}

/// JSON 트리를 평탄화합니다.
///
/// 분석기 에러는 `error`만 채워진 행 하나가 되고, 진단은 각각 한 행이 됩니다.
pub fn json_tree_to_diagnostics(tree: &JsonTree) -> Vec<DiagnosticRow> {
    let mut rows = Vec::new();
    for (package_id, analyzers) in tree {
        for (analyzer_name, result) in analyzers {
            match result {
                AnalyzerResult::Error { error } => rows.push(DiagnosticRow {
                    package_id: package_id.clone(),
                    analyzer_name: analyzer_name.clone(),
                    error: error.clone(),
                    ..DiagnosticRow::default()
                }),
                AnalyzerResult::Diagnostics(diagnostics) => {
                    rows.extend(diagnostics.iter().map(|d| DiagnosticRow {
                        package_id: package_id.clone(),
                        analyzer_name: analyzer_name.clone(),
                        error: String::new(),
                        category: d.category.clone(),
                        position: d.posn.clone(),
                        message: d.message.clone(),
                    }));
                }
            }
        }
    }
    rows
}

/// 바이트 출력을 JSON 트리로 파싱합니다. 빈 출력은 빈 트리입니다.
pub fn parse_json_tree(data: &[u8]) -> Result<JsonTree, ScanError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(JsonTree::new());
    }
    serde_json::from_slice(data).map_err(|e| ScanError::Decode(format!("analysis output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"{
        "example.com/m/b": {
            "printf": [
                {"category": "printf", "posn": "/src/b.go:3:2", "message": "bad verb"},
                {"posn": "/src/b.go:9:1", "message": "missing arg"}
            ]
        },
        "example.com/m/a": {
            "zeta": {"error": "analyzer crashed"},
            "alpha": []
        }
    }"#;

    #[test]
    fn flattens_in_package_then_analyzer_order() {
        let tree = parse_json_tree(TREE.as_bytes()).unwrap();
        let rows = json_tree_to_diagnostics(&tree);
        let keys: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.package_id.as_str(), r.analyzer_name.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("example.com/m/a", "zeta"),
                ("example.com/m/b", "printf"),
                ("example.com/m/b", "printf"),
            ]
        );
    }

    #[test]
    fn analyzer_error_yields_single_error_row() {
        let tree = parse_json_tree(TREE.as_bytes()).unwrap();
        let rows = json_tree_to_diagnostics(&tree);
        let err = &rows[0];
        assert_eq!(err.error, "analyzer crashed");
        assert!(err.message.is_empty());
        assert!(err.category.is_empty());
        assert!(err.position.is_empty());
    }

    #[test]
    fn output_is_byte_identical_across_runs() {
        let first = serde_json::to_vec(&json_tree_to_diagnostics(
            &parse_json_tree(TREE.as_bytes()).unwrap(),
        ))
        .unwrap();
        for _ in 0..10 {
            let again = serde_json::to_vec(&json_tree_to_diagnostics(
                &parse_json_tree(TREE.as_bytes()).unwrap(),
            ))
            .unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn empty_output_is_empty_tree() {
        assert!(parse_json_tree(b"  \n").unwrap().is_empty());
        assert!(parse_json_tree(b"not json").is_err());
    }
}
