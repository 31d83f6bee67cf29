//! 인메모리 웨어하우스 — 테스트 및 단일 프로세스 실행용

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use super::{PartitionQuery, TableSchema, Warehouse};
use crate::error::WarehouseError;

/// 인메모리 웨어하우스
///
/// 배치 크기 제한을 설정하면 제한을 넘는 배치에 대해
/// [`WarehouseError::PayloadTooLarge`]를 반환합니다.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    schemas: Mutex<HashMap<String, TableSchema>>,
    tables: Mutex<HashMap<String, Vec<Value>>>,
    batch_sizes: Mutex<Vec<usize>>,
    fail_next: Mutex<Option<String>>,
    max_batch_rows: Option<usize>,
    insert_delay: Option<Duration>,
}

impl MemoryWarehouse {
    /// 빈 웨어하우스를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 배치당 최대 행 수를 설정합니다.
    pub fn with_max_batch_rows(mut self, rows: usize) -> Self {
        self.max_batch_rows = Some(rows);
        self
    }

    /// 삽입마다 지연을 추가합니다.
    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    /// 다음 삽입 한 번을 실패시킵니다.
    pub fn fail_next_insert(&self, reason: impl Into<String>) {
        *lock(&self.fail_next) = Some(reason.into());
    }

    /// 테이블의 모든 행을 삽입 순서대로 반환합니다.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    /// 성공한 삽입 배치 크기 목록
    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.batch_sizes).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Warehouse for MemoryWarehouse {
    async fn create_or_update_table(&self, schema: &TableSchema) -> Result<bool, WarehouseError> {
        let mut schemas = lock(&self.schemas);
        if schemas.get(&schema.name) == Some(schema) {
            return Ok(false);
        }
        schemas.insert(schema.name.clone(), schema.clone());
        lock(&self.tables).entry(schema.name.clone()).or_default();
        Ok(true)
    }

    async fn insert(&self, table: &str, rows: &[Value]) -> Result<(), WarehouseError> {
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = lock(&self.fail_next).take() {
            return Err(WarehouseError::Insert {
                table: table.to_owned(),
                reason,
            });
        }

        if self.max_batch_rows.is_some_and(|max| rows.len() > max) {
            return Err(WarehouseError::PayloadTooLarge { rows: rows.len() });
        }

        let mut tables = lock(&self.tables);
        let stored = tables.get_mut(table).ok_or_else(|| WarehouseError::Insert {
            table: table.to_owned(),
            reason: "table does not exist".to_owned(),
        })?;
        stored.extend_from_slice(rows);
        lock(&self.batch_sizes).push(rows.len());
        Ok(())
    }

    async fn latest(&self, query: &PartitionQuery) -> Result<Vec<Value>, WarehouseError> {
        let tables = lock(&self.tables);
        let rows = tables
            .get(&query.from)
            .ok_or_else(|| WarehouseError::Query(format!("table {} does not exist", query.from)))?;
        Ok(query.evaluate(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_into_missing_table_fails() {
        let wh = MemoryWarehouse::new();
        let err = wh.insert("missing", &[json!({"a": 1})]).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn schema_change_is_reported() {
        let wh = MemoryWarehouse::new();
        let v1 = TableSchema::new("t", vec![]);
        let v2 = TableSchema::new(
            "t",
            vec![super::super::FieldSchema::new(
                "x",
                super::super::FieldKind::String,
            )],
        );
        assert!(wh.create_or_update_table(&v1).await.unwrap());
        assert!(!wh.create_or_update_table(&v1).await.unwrap());
        assert!(wh.create_or_update_table(&v2).await.unwrap());
    }

    #[tokio::test]
    async fn latest_on_memory_rows() {
        let wh = MemoryWarehouse::new();
        wh.create_or_update_table(&TableSchema::new("t", vec![]))
            .await
            .unwrap();
        wh.insert(
            "t",
            &[
                json!({"k": "a", "n": 1}),
                json!({"k": "a", "n": 3}),
                json!({"k": "b", "n": 2}),
            ],
        )
        .await
        .unwrap();
        let query = PartitionQuery::new("t").partition_on(["k"]).order_by_desc("n");
        let latest = wh.latest(&query).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0]["n"], 3);
        assert_eq!(latest[1]["n"], 2);
    }
}
