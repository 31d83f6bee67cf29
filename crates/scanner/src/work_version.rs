//! 작업 버전 -- 재스캔 필요 여부 판단
//!
//! 같은 입력을 같은 코드로 다시 스캔하면 같은 결과가 나온다는 전제로,
//! 이전 결과 행에 기록된 [`WorkVersion`]이 현재와 같으면 스캔을 건너뜁니다.
//!
//! # 판단 흐름
//!
//! ```text
//! warehouse --PartitionQuery(module_path, sortable_version[, binary_name])-->
//!     최신 행 --> WorkVersion (이전)
//!                     |
//!     equal(이전, 현재) ? skip : scan
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use modscan_core::warehouse::{PartitionQuery, Warehouse};

use crate::error::ScanError;

/// 결과에 영향을 주는 버전 요소
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkVersion {
    /// 스캔 도구 버전 (govulncheck 또는 분석 바이너리 이름)
    pub tool_version: String,
    /// 워커 로직 버전
    pub worker_version: String,
    /// 결과 스키마 버전
    pub schema_version: String,
    /// 취약점 DB 최종 수정 시각
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulndb_last_modified: Option<DateTime<Utc>>,
    /// 분석 바이너리와 인자의 해시 (분석 스캔에서만)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_hash: Option<String>,
}

/// 두 작업 버전이 같은지 비교합니다. 어느 한쪽이라도 없으면 `false`.
pub fn equal(a: Option<&WorkVersion>, b: Option<&WorkVersion>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// 바이너리 내용과 NUL로 연결한 인자의 SHA-256 (hex)
pub async fn binary_hash(path: &Path, args: &[String]) -> Result<String, ScanError> {
    let data = tokio::fs::read(path).await.map_err(|source| ScanError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(hash_with_args(&data, args))
}

fn hash_with_args(data: &[u8], args: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.update(args.join("\0").as_bytes());
    hex::encode(hasher.finalize())
}

/// 결과 파티션 키
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkKey {
    /// 모듈 경로
    pub module_path: String,
    /// 정렬 가능한 버전
    pub sortable_version: String,
    /// 바이너리 이름 (바이너리별 결과일 때)
    pub binary_name: Option<String>,
}

impl WorkKey {
    /// 모듈 단위 키
    pub fn module(module_path: impl Into<String>, sortable_version: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            sortable_version: sortable_version.into(),
            binary_name: None,
        }
    }

    /// 바이너리 단위 키
    pub fn binary(
        module_path: impl Into<String>,
        sortable_version: impl Into<String>,
        binary_name: impl Into<String>,
    ) -> Self {
        Self {
            module_path: module_path.into(),
            sortable_version: sortable_version.into(),
            binary_name: Some(binary_name.into()),
        }
    }
}

/// 이전 결과의 작업 버전 모음
#[derive(Debug, Default, Clone)]
pub struct WorkVersionTracker {
    versions: HashMap<WorkKey, WorkVersion>,
}

impl WorkVersionTracker {
    /// 이전 작업 버전을 조회합니다.
    ///
    /// `keys`의 모듈 경로로 범위를 좁히고, 키 중 하나라도 바이너리 이름을
    /// 가지면 바이너리별로 파티션합니다. 각 파티션의 최신(`created_at` 내림차순)
    /// 행만 사용합니다.
    pub async fn load<W: Warehouse>(
        warehouse: &W,
        table: &str,
        keys: &[WorkKey],
    ) -> Result<Self, ScanError> {
        if keys.is_empty() {
            return Ok(Self::default());
        }
        Self::load_query(warehouse, &Self::query(table, keys)).await
    }

    /// 직접 구성한 질의로 조회합니다 (추가 필터가 필요할 때).
    pub async fn load_query<W: Warehouse>(
        warehouse: &W,
        query: &PartitionQuery,
    ) -> Result<Self, ScanError> {
        let table = query.from.as_str();
        let rows = warehouse.latest(query).await?;

        let by_binary = query.partition_on.iter().any(|c| c == "binary_name");
        let mut versions = HashMap::new();
        for row in rows {
            match parse_row(&row, by_binary) {
                Some((key, version)) => {
                    versions.insert(key, version);
                }
                None => warn!(table, "skipping result row without a readable work version"),
            }
        }
        debug!(table, entries = versions.len(), "loaded work versions");
        Ok(Self { versions })
    }

    /// 조회 질의를 구성합니다.
    pub fn query(table: &str, keys: &[WorkKey]) -> PartitionQuery {
        let mut partition = vec!["module_path", "sortable_version"];
        if keys.iter().any(|k| k.binary_name.is_some()) {
            partition.push("binary_name");
        }
        let mut modules: Vec<&str> = keys.iter().map(|k| k.module_path.as_str()).collect();
        modules.sort_unstable();
        modules.dedup();

        PartitionQuery::new(table)
            .columns(
                partition
                    .iter()
                    .copied()
                    .chain(["work_version", "created_at"]),
            )
            .partition_on(partition)
            .order_by_desc("created_at")
            .filter_in("module_path", modules)
    }

    /// 이전 작업 버전
    pub fn get(&self, key: &WorkKey) -> Option<&WorkVersion> {
        self.versions.get(key)
    }

    /// 현재 작업 버전으로 다시 스캔해야 하는지 판단합니다.
    pub fn should_scan(&self, key: &WorkKey, current: &WorkVersion) -> bool {
        !equal(self.versions.get(key), Some(current))
    }

    /// 알려진 항목 수
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// 알려진 항목이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

fn parse_row(row: &Value, by_binary: bool) -> Option<(WorkKey, WorkVersion)> {
    let module_path = row.get("module_path")?.as_str()?.to_owned();
    let sortable_version = row.get("sortable_version")?.as_str()?.to_owned();
    let binary_name = if by_binary {
        row.get("binary_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    } else {
        None
    };
    let version = serde_json::from_value(row.get("work_version")?.clone()).ok()?;
    Some((
        WorkKey {
            module_path,
            sortable_version,
            binary_name,
        },
        version,
    ))
}
