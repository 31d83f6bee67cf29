//! 파티션별 최신 행 조회
//!
//! 추가 전용 테이블에서 "키별 가장 최근 행"을 고르는 질의를 표현합니다.
//! SQL 백엔드는 [`PartitionQuery::to_sql`]을, 인프로세스 백엔드는
//! [`PartitionQuery::evaluate`]를 사용합니다. 두 경로는 같은 의미를 가집니다.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::DateTime;
use serde_json::Value;

/// 정렬 기준
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// 컬럼 이름
    pub column: String,
    /// 내림차순 여부
    pub descending: bool,
}

/// 필터 조건 (모든 조건은 AND로 결합)
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`
    Eq { column: String, value: Value },
    /// `column IN (values..)`
    In { column: String, values: Vec<Value> },
}

impl Condition {
    fn matches(&self, row: &Value) -> bool {
        match self {
            Self::Eq { column, value } => row.get(column) == Some(value),
            Self::In { column, values } => row
                .get(column)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
        }
    }

    fn to_sql(&self) -> String {
        match self {
            Self::Eq { column, value } => format!("{column} = {}", sql_literal(value)),
            Self::In { column, values } => {
                let list: Vec<String> = values.iter().map(sql_literal).collect();
                format!("{column} IN ({})", list.join(", "))
            }
        }
    }
}

/// 파티션별 최신 행 질의
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionQuery {
    /// 선택할 컬럼 (비어있으면 전체)
    pub columns: Vec<String>,
    /// 대상 테이블
    pub from: String,
    /// 파티션 키 컬럼
    pub partition_on: Vec<String>,
    /// 파티션 내 정렬 (첫 행이 선택됨)
    pub order_by: Vec<OrderBy>,
    /// 필터 조건
    pub filter: Vec<Condition>,
}

impl PartitionQuery {
    /// 테이블에 대한 빈 질의를 생성합니다.
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            from: from.into(),
            partition_on: Vec::new(),
            order_by: Vec::new(),
            filter: Vec::new(),
        }
    }

    /// 선택할 컬럼을 지정합니다.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// 파티션 키를 지정합니다.
    pub fn partition_on<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_on = columns.into_iter().map(Into::into).collect();
        self
    }

    /// 내림차순 정렬 기준을 추가합니다.
    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: true,
        });
        self
    }

    /// 오름차순 정렬 기준을 추가합니다.
    pub fn order_by_asc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: false,
        });
        self
    }

    /// 동등 조건을 추가합니다.
    pub fn filter_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.push(Condition::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// 포함 조건을 추가합니다.
    pub fn filter_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// SQL 문자열을 생성합니다.
    ///
    /// ```text
    /// SELECT * EXCEPT (rownum) FROM (
    ///   SELECT *, ROW_NUMBER() OVER (PARTITION BY a, b ORDER BY c DESC) AS rownum
    ///   FROM `table`
    ///   WHERE ...
    /// ) WHERE rownum = 1
    /// ```
    pub fn to_sql(&self) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_owned()
        } else {
            self.columns.join(", ")
        };

        let mut window = String::new();
        if !self.partition_on.is_empty() {
            window.push_str("PARTITION BY ");
            window.push_str(&self.partition_on.join(", "));
        }
        if !self.order_by.is_empty() {
            if !window.is_empty() {
                window.push(' ');
            }
            let order: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    format!(
                        "{} {}",
                        o.column,
                        if o.descending { "DESC" } else { "ASC" }
                    )
                })
                .collect();
            window.push_str("ORDER BY ");
            window.push_str(&order.join(", "));
        }

        let mut sql = format!(
            "SELECT * EXCEPT (rownum) FROM (\n  SELECT {columns}, ROW_NUMBER() OVER ({window}) AS rownum\n  FROM `{}`",
            self.from
        );
        if !self.filter.is_empty() {
            let conditions: Vec<String> = self.filter.iter().map(Condition::to_sql).collect();
            sql.push_str("\n  WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str("\n) WHERE rownum = 1");
        sql
    }

    /// 메모리 상의 행에 질의를 적용합니다.
    ///
    /// 파티션 키 순서로 정렬된 결과를 반환합니다. 정렬 기준이 같은 행이
    /// 여러 개면 먼저 나온 행이 선택됩니다.
    pub fn evaluate(&self, rows: &[Value]) -> Vec<Value> {
        let mut best: BTreeMap<String, &Value> = BTreeMap::new();

        for row in rows.iter().filter(|r| self.filter.iter().all(|c| c.matches(r))) {
            let key = self.partition_key(row);
            match best.get(&key) {
                Some(current) if self.compare(row, current) != Ordering::Less => {}
                _ => {
                    best.insert(key, row);
                }
            }
        }

        best.into_values().map(|row| self.project(row)).collect()
    }

    fn partition_key(&self, row: &Value) -> String {
        let parts: Vec<&Value> = self
            .partition_on
            .iter()
            .map(|c| row.get(c).unwrap_or(&Value::Null))
            .collect();
        serde_json::to_string(&parts).unwrap_or_default()
    }

    /// `Less`면 `a`가 `b`보다 먼저 선택됩니다.
    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for order in &self.order_by {
            let left = a.get(&order.column).unwrap_or(&Value::Null);
            let right = b.get(&order.column).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            let ord = if order.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn project(&self, row: &Value) -> Value {
        if self.columns.is_empty() {
            return row.clone();
        }
        let mut out = serde_json::Map::new();
        for column in &self.columns {
            out.insert(
                column.clone(),
                row.get(column).cloned().unwrap_or(Value::Null),
            );
        }
        Value::Object(out)
    }
}

/// 값 비교: null < bool < 숫자 < 문자열. 두 문자열이 모두 RFC 3339 시각이면 시각으로 비교합니다.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(tx), Ok(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Null => "NULL".to_owned(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn work_version_query() -> PartitionQuery {
        PartitionQuery::new("vulncheck_results")
            .columns(["module_path", "sortable_version", "work_version"])
            .partition_on(["module_path", "sortable_version"])
            .order_by_desc("created_at")
    }

    #[test]
    fn to_sql_shape() {
        let sql = work_version_query()
            .filter_in("module_path", ["golang.org/x/text"])
            .to_sql();
        assert!(sql.contains(
            "ROW_NUMBER() OVER (PARTITION BY module_path, sortable_version ORDER BY created_at DESC) AS rownum"
        ));
        assert!(sql.contains("FROM `vulncheck_results`"));
        assert!(sql.contains("WHERE module_path IN ('golang.org/x/text')"));
        assert!(sql.ends_with("WHERE rownum = 1"));
    }

    #[test]
    fn to_sql_escapes_quotes() {
        let sql = PartitionQuery::new("t").filter_eq("user", "o'brien").to_sql();
        assert!(sql.contains("user = 'o\\'brien'"));
    }

    #[test]
    fn evaluate_picks_latest_per_partition() {
        let rows = vec![
            json!({"module_path": "a", "sortable_version": "1", "created_at": "2024-01-01T00:00:00Z", "work_version": 1}),
            json!({"module_path": "a", "sortable_version": "1", "created_at": "2024-02-01T00:00:00Z", "work_version": 2}),
            json!({"module_path": "a", "sortable_version": "2", "created_at": "2024-01-15T00:00:00Z", "work_version": 3}),
            json!({"module_path": "b", "sortable_version": "1", "created_at": "2023-12-01T00:00:00Z", "work_version": 4}),
        ];
        let latest = work_version_query().evaluate(&rows);
        let versions: Vec<i64> = latest
            .iter()
            .filter_map(|r| r["work_version"].as_i64())
            .collect();
        assert_eq!(versions, vec![2, 3, 4]);
        assert!(latest[0].get("created_at").is_none());
    }

    #[test]
    fn evaluate_compares_timestamps_not_strings() {
        // 소수점 초가 있는 시각은 문자열 비교로는 더 작게 보입니다
        let rows = vec![
            json!({"k": "a", "created_at": "2024-01-01T00:00:00.500Z", "n": 1}),
            json!({"k": "a", "created_at": "2024-01-01T00:00:00Z", "n": 2}),
        ];
        let latest = PartitionQuery::new("t")
            .partition_on(["k"])
            .order_by_desc("created_at")
            .evaluate(&rows);
        assert_eq!(latest[0]["n"], 1);
    }

    #[test]
    fn evaluate_applies_filters() {
        let rows = vec![
            json!({"job_id": "x", "n": 1}),
            json!({"job_id": "y", "n": 2}),
        ];
        let out = PartitionQuery::new("t")
            .partition_on(["n"])
            .filter_eq("job_id", "y")
            .evaluate(&rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["n"], 2);
    }

    #[test]
    fn evaluate_ties_keep_first_row() {
        let rows = vec![
            json!({"k": "a", "n": 1, "tag": "first"}),
            json!({"k": "a", "n": 1, "tag": "second"}),
        ];
        let out = PartitionQuery::new("t")
            .partition_on(["k"])
            .order_by_desc("n")
            .evaluate(&rows);
        assert_eq!(out[0]["tag"], "first");
    }

    #[test]
    fn null_sorts_before_values() {
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
    }
}
