//! 요청 수 결과 행과 테이블 스키마
//!
//! 같은 날짜를 다시 계산해 삽입하는 것이 보정 방법입니다. 조회 시에는
//! 날짜(와 IP)별로 `inserted_at`이 가장 최근인 행만 사용합니다.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use modscan_core::warehouse::{FieldKind, FieldSchema, PartitionQuery, Row, TableSchema};

/// IP별 요청 수 테이블
pub const IP_COUNTS_TABLE: &str = "ip_request_counts";

/// 전체 요청 수 테이블
pub const COUNTS_TABLE: &str = "request_counts";

/// IP별 일일 요청 수
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRequestCount {
    pub date: NaiveDate,
    pub ip: String,
    pub count: u64,
    pub inserted_at: DateTime<Utc>,
}

impl Row for IpRequestCount {
    fn set_upload_time(&mut self, at: DateTime<Utc>) {
        self.inserted_at = at;
    }
}

/// 일일 전체 요청 수
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCount {
    pub date: NaiveDate,
    pub count: u64,
    pub inserted_at: DateTime<Utc>,
}

impl Row for RequestCount {
    fn set_upload_time(&mut self, at: DateTime<Utc>) {
        self.inserted_at = at;
    }
}

/// 집계 맵에서 행을 만듭니다. IP 행은 IP 순으로 정렬됩니다.
pub fn count_rows(
    date: NaiveDate,
    per_ip: &HashMap<String, u64>,
) -> (Vec<IpRequestCount>, RequestCount) {
    let now = Utc::now();
    let mut ip_rows: Vec<IpRequestCount> = per_ip
        .iter()
        .map(|(ip, count)| IpRequestCount {
            date,
            ip: ip.clone(),
            count: *count,
            inserted_at: now,
        })
        .collect();
    ip_rows.sort_by(|a, b| a.ip.cmp(&b.ip));

    let total = RequestCount {
        date,
        count: per_ip.values().sum(),
        inserted_at: now,
    };
    (ip_rows, total)
}

/// IP별 요청 수 테이블 스키마
pub fn ip_counts_schema() -> TableSchema {
    TableSchema::new(
        IP_COUNTS_TABLE,
        vec![
            FieldSchema::new("date", FieldKind::String),
            FieldSchema::new("ip", FieldKind::String),
            FieldSchema::new("count", FieldKind::Integer),
            FieldSchema::new("inserted_at", FieldKind::Timestamp),
        ],
    )
}

/// 전체 요청 수 테이블 스키마
pub fn counts_schema() -> TableSchema {
    TableSchema::new(
        COUNTS_TABLE,
        vec![
            FieldSchema::new("date", FieldKind::String),
            FieldSchema::new("count", FieldKind::Integer),
            FieldSchema::new("inserted_at", FieldKind::Timestamp),
        ],
    )
}

/// 집계기가 쓰는 모든 테이블
pub fn tables() -> Vec<TableSchema> {
    vec![ip_counts_schema(), counts_schema()]
}

/// 날짜별 최신 전체 요청 수 질의
pub fn latest_counts_query() -> PartitionQuery {
    PartitionQuery::new(COUNTS_TABLE)
        .columns(["date", "count", "inserted_at"])
        .partition_on(["date"])
        .order_by_desc("inserted_at")
}

/// 날짜/IP별 최신 요청 수 질의
pub fn latest_ip_counts_query() -> PartitionQuery {
    PartitionQuery::new(IP_COUNTS_TABLE)
        .columns(["date", "ip", "count", "inserted_at"])
        .partition_on(["date", "ip"])
        .order_by_desc("inserted_at")
}

#[cfg(test)]
mod tests {
    use super::*;
    use modscan_core::warehouse::{MemoryWarehouse, SchemaRegistry, Warehouse, create_tables, upload_many};
    use std::time::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn rows_are_sorted_and_totalled() {
        let per_ip = HashMap::from([("10.0.0.2".to_owned(), 3), ("10.0.0.1".to_owned(), 4)]);
        let (ips, total) = count_rows(date(), &per_ip);
        assert_eq!(ips[0].ip, "10.0.0.1");
        assert_eq!(ips[1].count, 3);
        assert_eq!(total.count, 7);
        assert_eq!(total.date, date());
    }

    #[test]
    fn latest_query_partitions_by_date() {
        let sql = latest_counts_query().to_sql();
        assert!(sql.contains("PARTITION BY date"), "{sql}");
        assert!(sql.contains("ORDER BY inserted_at DESC"), "{sql}");
    }

    #[tokio::test]
    async fn recomputed_date_replaces_previous_count() {
        let wh = MemoryWarehouse::new();
        let registry = SchemaRegistry::new(tables());
        create_tables(&wh, &registry).await.unwrap();

        let first = HashMap::from([("a".to_owned(), 1)]);
        let (_, total) = count_rows(date(), &first);
        upload_many(&wh, &registry, COUNTS_TABLE, vec![total], 10, Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let corrected = HashMap::from([("a".to_owned(), 1), ("b".to_owned(), 5)]);
        let (_, total) = count_rows(date(), &corrected);
        upload_many(&wh, &registry, COUNTS_TABLE, vec![total], 10, Duration::from_secs(5))
            .await
            .unwrap();

        let latest = wh.latest(&latest_counts_query()).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0]["count"], 6);
        assert_eq!(latest[0]["date"], "2024-05-01");
    }
}
