//! 결과 웨어하우스 인터페이스
//!
//! 스캔 결과는 추가 전용(append-only) 행으로 기록됩니다. 같은 모듈을 다시
//! 스캔하면 새 행이 추가되고, 읽는 쪽은 [`PartitionQuery`]로 파티션별 최신
//! 행만 골라냅니다.
//!
//! - [`Row`]: 업로드 가능한 행 (업로드 시각 스탬프)
//! - [`SchemaRegistry`]: 시작 시 한 번 구성되는 읽기 전용 테이블 스키마 목록
//! - [`Warehouse`]: 백엔드 트레이트 ([`MemoryWarehouse`], [`JsonlWarehouse`])
//! - [`upload_many`]: 청크 분할 + 크기 초과 시 반분할 재시도 업로드

mod jsonl;
mod memory;
mod query;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::WarehouseError;
use crate::metrics as m;

pub use jsonl::JsonlWarehouse;
pub use memory::MemoryWarehouse;
pub use query::{Condition, OrderBy, PartitionQuery};

/// 업로드 가능한 행
///
/// 업로드 직전에 [`upload_many`]가 `set_upload_time`으로 삽입 시각을 기록합니다.
pub trait Row: Serialize + Send + Sync {
    /// 업로드 시각을 설정합니다.
    fn set_upload_time(&mut self, at: DateTime<Utc>);
}

/// 필드 타입
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    /// 중첩 레코드
    Record(Vec<FieldSchema>),
}

/// 필드 스키마
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// 필드 이름
    pub name: String,
    /// 필드 타입
    pub kind: FieldKind,
    /// 반복(배열) 필드 여부
    #[serde(default)]
    pub repeated: bool,
}

impl FieldSchema {
    /// 단일 값 필드
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            repeated: false,
        }
    }

    /// 반복 필드
    pub fn repeated(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            repeated: true,
        }
    }
}

/// 테이블 스키마 (필드 순서 보존)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// 테이블 이름
    pub name: String,
    /// 필드 목록
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    /// 새 테이블 스키마를 생성합니다.
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

/// 테이블 스키마 레지스트리
///
/// 시작 시 한 번 구성한 뒤에는 읽기 전용입니다. `Arc`로 감싸 공유합니다.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableSchema>,
}

impl SchemaRegistry {
    /// 스키마 목록으로 레지스트리를 구성합니다.
    ///
    /// 같은 이름이 두 번 나오면 뒤의 스키마가 남습니다.
    pub fn new(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        let tables = schemas
            .into_iter()
            .map(|schema| (schema.name.clone(), schema))
            .collect();
        Self { tables }
    }

    /// 테이블 스키마를 조회합니다.
    pub fn get(&self, table: &str) -> Result<&TableSchema, WarehouseError> {
        self.tables
            .get(table)
            .ok_or_else(|| WarehouseError::UnknownTable(table.to_owned()))
    }

    /// 등록된 테이블 이름 (정렬됨)
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 등록된 스키마를 순회합니다.
    pub fn schemas(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// 등록된 테이블 수
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// 비어있는지 여부
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// 웨어하우스 백엔드
///
/// 실제 분석용 데이터 웨어하우스 클라이언트는 이 트레이트 뒤에 연결됩니다.
/// 백엔드는 너무 큰 배치에 대해 [`WarehouseError::PayloadTooLarge`]를 반환해야
/// [`upload_many`]가 배치를 나눠 재시도할 수 있습니다.
pub trait Warehouse: Send + Sync + 'static {
    /// 테이블을 생성하거나 스키마를 갱신합니다. 변경이 있었으면 `true`.
    fn create_or_update_table(
        &self,
        schema: &TableSchema,
    ) -> impl Future<Output = Result<bool, WarehouseError>> + Send;

    /// 행 배치를 삽입합니다.
    fn insert(
        &self,
        table: &str,
        rows: &[Value],
    ) -> impl Future<Output = Result<(), WarehouseError>> + Send;

    /// 파티션별 최신 행을 조회합니다.
    fn latest(
        &self,
        query: &PartitionQuery,
    ) -> impl Future<Output = Result<Vec<Value>, WarehouseError>> + Send;
}

/// 레지스트리의 모든 테이블을 생성/갱신합니다.
///
/// 갱신된 테이블 이름을 반환합니다. 실패 시 즉시 에러를 반환합니다.
pub async fn create_tables<W: Warehouse>(
    warehouse: &W,
    registry: &SchemaRegistry,
) -> Result<Vec<String>, WarehouseError> {
    let mut changed = Vec::new();
    for name in registry.table_names() {
        let schema = registry.get(name)?;
        if warehouse.create_or_update_table(schema).await? {
            changed.push(name.to_owned());
        }
    }
    Ok(changed)
}

/// 행들을 청크 단위로 업로드합니다.
///
/// 1. 모든 행에 현재 시각을 업로드 시각으로 기록합니다.
/// 2. `chunk_size` 단위로 나눠 삽입합니다.
/// 3. 백엔드가 `PayloadTooLarge`를 반환하면 배치를 반으로 나눠 재시도합니다
///    (순서 보존, 크기 1까지). 그 외 에러는 즉시 반환합니다.
/// 4. 전체 호출은 `deadline` 안에 끝나야 합니다.
///
/// 업로드된 행 수를 반환합니다.
pub async fn upload_many<W, R>(
    warehouse: &W,
    registry: &SchemaRegistry,
    table: &str,
    rows: Vec<R>,
    chunk_size: usize,
    deadline: Duration,
) -> Result<usize, WarehouseError>
where
    W: Warehouse,
    R: Row,
{
    registry.get(table)?;
    if rows.is_empty() {
        return Ok(0);
    }

    let now = Utc::now();
    let values = rows
        .into_iter()
        .map(|mut row| {
            row.set_upload_time(now);
            serde_json::to_value(&row)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let total = values.len();
    let chunk_size = chunk_size.max(1);

    let upload = async {
        for chunk in values.chunks(chunk_size) {
            insert_splitting(warehouse, table, chunk).await?;
        }
        Ok::<_, WarehouseError>(())
    };

    let result = match tokio::time::timeout(deadline, upload).await {
        Ok(result) => result,
        Err(_) => Err(WarehouseError::Deadline {
            table: table.to_owned(),
            secs: deadline.as_secs(),
        }),
    };

    match result {
        Ok(()) => {
            metrics::counter!(m::WAREHOUSE_ROWS_UPLOADED_TOTAL, m::LABEL_TABLE => table.to_owned())
                .increment(u64::try_from(total).unwrap_or(u64::MAX));
            debug!(table, rows = total, "upload completed");
            Ok(total)
        }
        Err(e) => {
            metrics::counter!(m::WAREHOUSE_UPLOAD_FAILURES_TOTAL, m::LABEL_TABLE => table.to_owned())
                .increment(1);
            warn!(table, rows = total, error = %e, "upload failed");
            Err(e)
        }
    }
}

/// 한 청크를 삽입하고, 크기 초과 시 반씩 나눠 재시도합니다.
async fn insert_splitting<W: Warehouse>(
    warehouse: &W,
    table: &str,
    chunk: &[Value],
) -> Result<(), WarehouseError> {
    // 작업 스택: 뒤쪽 절반을 먼저 넣어 앞쪽 절반이 먼저 처리되도록 순서를 보존
    let mut stack: Vec<&[Value]> = vec![chunk];
    while let Some(batch) = stack.pop() {
        match warehouse.insert(table, batch).await {
            Ok(()) => {}
            Err(WarehouseError::PayloadTooLarge { .. }) if batch.len() > 1 => {
                let (front, back) = batch.split_at(batch.len() / 2);
                debug!(
                    table,
                    rows = batch.len(),
                    "batch too large, splitting in half"
                );
                metrics::counter!(m::WAREHOUSE_BATCH_SPLITS_TOTAL, m::LABEL_TABLE => table.to_owned())
                    .increment(1);
                stack.push(back);
                stack.push(front);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
