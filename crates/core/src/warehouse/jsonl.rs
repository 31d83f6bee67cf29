//! JSONL 파일 웨어하우스
//!
//! 테이블마다 디렉토리 안에 두 파일을 둡니다.
//! - `<table>.jsonl`: 한 줄에 한 행, 추가 전용
//! - `<table>.schema.json`: 마지막으로 적용된 스키마

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{PartitionQuery, TableSchema, Warehouse};
use crate::error::WarehouseError;

/// 디렉토리 기반 JSONL 웨어하우스
#[derive(Debug)]
pub struct JsonlWarehouse {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlWarehouse {
    /// 디렉토리를 루트로 하는 웨어하우스를 생성합니다 (디렉토리는 필요 시 생성).
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, WarehouseError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| io_error(&dir, source))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// 루트 디렉토리
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn data_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.jsonl"))
    }

    fn schema_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.schema.json"))
    }

    /// 테이블의 모든 행을 읽습니다. 손상된 줄은 건너뜁니다.
    pub async fn read_all(&self, table: &str) -> Result<Vec<Value>, WarehouseError> {
        let path = self.data_path(table);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WarehouseError::Query(format!("table {table} does not exist")));
            }
            Err(source) => return Err(io_error(&path, source)),
        };

        let mut rows = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(
                    table,
                    line = lineno + 1,
                    error = %e,
                    "skipping corrupt warehouse row"
                ),
            }
        }
        Ok(rows)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> WarehouseError {
    WarehouseError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn validate_table_name(table: &str) -> Result<(), WarehouseError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(WarehouseError::UnknownTable(table.to_owned()))
    }
}

impl Warehouse for JsonlWarehouse {
    async fn create_or_update_table(&self, schema: &TableSchema) -> Result<bool, WarehouseError> {
        validate_table_name(&schema.name)?;
        let _guard = self.write_lock.lock().await;

        let schema_path = self.schema_path(&schema.name);
        let existing = match tokio::fs::read(&schema_path).await {
            Ok(bytes) => serde_json::from_slice::<TableSchema>(&bytes).ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => return Err(io_error(&schema_path, source)),
        };
        if existing.as_ref() == Some(schema) {
            debug!(table = %schema.name, "table schema unchanged");
            return Ok(false);
        }

        let encoded = serde_json::to_vec_pretty(schema)?;
        tokio::fs::write(&schema_path, encoded)
            .await
            .map_err(|source| io_error(&schema_path, source))?;

        let data_path = self.data_path(&schema.name);
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&data_path)
            .await
            .map_err(|source| io_error(&data_path, source))?;

        info!(table = %schema.name, fields = schema.fields.len(), "table schema updated");
        Ok(true)
    }

    async fn insert(&self, table: &str, rows: &[Value]) -> Result<(), WarehouseError> {
        validate_table_name(table)?;
        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, row)?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let path = self.data_path(table);
        if !tokio::fs::try_exists(&self.schema_path(table))
            .await
            .unwrap_or(false)
        {
            return Err(WarehouseError::Insert {
                table: table.to_owned(),
                reason: "table does not exist".to_owned(),
            });
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| io_error(&path, source))?;
        file.write_all(&buf)
            .await
            .map_err(|source| io_error(&path, source))?;
        file.flush()
            .await
            .map_err(|source| io_error(&path, source))?;
        Ok(())
    }

    async fn latest(&self, query: &PartitionQuery) -> Result<Vec<Value>, WarehouseError> {
        validate_table_name(&query.from)?;
        let rows = self.read_all(&query.from).await?;
        Ok(query.evaluate(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{FieldKind, FieldSchema};
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new(
            "counts",
            vec![
                FieldSchema::new("date", FieldKind::String),
                FieldSchema::new("count", FieldKind::Integer),
            ],
        )
    }

    #[tokio::test]
    async fn create_insert_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        assert!(wh.create_or_update_table(&schema()).await.unwrap());
        assert!(!wh.create_or_update_table(&schema()).await.unwrap());

        wh.insert("counts", &[json!({"date": "2024-01-01", "count": 3})])
            .await
            .unwrap();
        wh.insert("counts", &[json!({"date": "2024-01-01", "count": 5})])
            .await
            .unwrap();

        let rows = wh.read_all("counts").await.unwrap();
        assert_eq!(rows.len(), 2);

        let latest = wh
            .latest(
                &PartitionQuery::new("counts")
                    .partition_on(["date"])
                    .order_by_desc("count"),
            )
            .await
            .unwrap();
        assert_eq!(latest, vec![json!({"date": "2024-01-01", "count": 5})]);
    }

    #[tokio::test]
    async fn insert_without_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        let err = wh.insert("counts", &[json!({})]).await.unwrap_err();
        assert!(matches!(err, WarehouseError::Insert { .. }));
    }

    #[tokio::test]
    async fn rejects_path_like_table_names() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        let err = wh.insert("../etc/passwd", &[]).await.unwrap_err();
        assert!(matches!(err, WarehouseError::UnknownTable(_)));
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        wh.create_or_update_table(&schema()).await.unwrap();
        tokio::fs::write(
            dir.path().join("counts.jsonl"),
            "{\"date\":\"d\",\"count\":1}\nnot json\n",
        )
        .await
        .unwrap();
        assert_eq!(wh.read_all("counts").await.unwrap().len(), 1);
    }
}
