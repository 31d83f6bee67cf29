//! 접근 로그 줄 파싱
//!
//! 한 줄은 JSON 객체 하나입니다. 필요한 필드는 `timestamp`와
//! `httpRequest.remoteIp`뿐이며 나머지는 무시합니다.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::ReqCountError;

/// 요청 한 건
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHit {
    /// 요청 날짜 (UTC)
    pub date: NaiveDate,
    /// 원격 IP
    pub ip: String,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "httpRequest")]
    http_request: Option<HttpRequest>,
}

#[derive(Debug, Deserialize)]
struct HttpRequest {
    #[serde(rename = "remoteIp")]
    remote_ip: Option<String>,
}

/// 로그 줄 하나를 파싱합니다.
///
/// `remoteIp`나 `timestamp`가 없는 줄은 `Ok(None)`입니다. JSON이 아니면 에러입니다.
pub fn parse_log_line(line: &str) -> Result<Option<LogHit>, ReqCountError> {
    let raw: RawLine =
        serde_json::from_str(line).map_err(|e| ReqCountError::Parse(e.to_string()))?;

    let Some(ip) = raw
        .http_request
        .and_then(|r| r.remote_ip)
        .filter(|ip| !ip.is_empty())
    else {
        debug!("skipping log line without remoteIp");
        return Ok(None);
    };
    let Some(timestamp) = raw.timestamp else {
        debug!(ip = %ip, "skipping log line without timestamp");
        return Ok(None);
    };

    Ok(Some(LogHit {
        date: timestamp.date_naive(),
        ip,
    }))
}

/// 여러 로그 줄의 집계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineCounts {
    /// IP별 요청 수
    pub per_ip: HashMap<String, u64>,
    /// 파싱된 줄 수 (건너뛴 줄 포함)
    pub lines: u64,
    /// 파싱 실패 줄 수
    pub parse_errors: u64,
}

impl LineCounts {
    /// 요청 한 건을 더합니다.
    pub fn add(&mut self, hit: LogHit) {
        *self.per_ip.entry(hit.ip).or_insert(0) += 1;
    }

    /// 다른 집계를 합칩니다.
    pub fn merge(&mut self, other: LineCounts) {
        for (ip, n) in other.per_ip {
            *self.per_ip.entry(ip).or_insert(0) += n;
        }
        self.lines += other.lines;
        self.parse_errors += other.parse_errors;
    }

    /// 전체 요청 수
    pub fn total(&self) -> u64 {
        self.per_ip.values().sum()
    }
}

/// 줄 단위 텍스트를 집계합니다. 빈 줄은 건너뛰고, 잘못된 줄은 세고 넘어갑니다.
pub fn count_lines(text: &str) -> LineCounts {
    let mut counts = LineCounts::default();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match parse_log_line(line) {
            Ok(Some(hit)) => {
                counts.lines += 1;
                counts.add(hit);
            }
            Ok(None) => counts.lines += 1,
            Err(e) => {
                debug!(error = %e, "malformed log line");
                counts.parse_errors += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timestamp_and_remote_ip() {
        let hit = parse_log_line(
            r#"{"timestamp":"2024-05-01T23:59:59.5Z","httpRequest":{"remoteIp":"10.0.0.1","status":200},"severity":"INFO"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(hit.ip, "10.0.0.1");
        assert_eq!(hit.date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    }

    #[test]
    fn missing_remote_ip_is_skipped() {
        assert_eq!(
            parse_log_line(r#"{"timestamp":"2024-05-01T00:00:00Z","httpRequest":{}}"#).unwrap(),
            None
        );
        assert_eq!(
            parse_log_line(r#"{"timestamp":"2024-05-01T00:00:00Z"}"#).unwrap(),
            None
        );
    }

    #[test]
    fn malformed_json_is_error() {
        assert!(matches!(
            parse_log_line("not json"),
            Err(ReqCountError::Parse(_))
        ));
    }

    #[test]
    fn count_lines_tolerates_bad_lines() {
        let text = concat!(
            r#"{"timestamp":"2024-05-01T00:00:00Z","httpRequest":{"remoteIp":"a"}}"#,
            "\n{broken\n\n",
            r#"{"timestamp":"2024-05-01T00:00:01Z","httpRequest":{"remoteIp":"a"}}"#,
            "\n",
            r#"{"timestamp":"2024-05-01T00:00:02Z","httpRequest":{"remoteIp":"b"}}"#,
            "\n",
            r#"{"timestamp":"2024-05-01T00:00:03Z"}"#,
        );
        let counts = count_lines(text);
        assert_eq!(counts.per_ip.get("a"), Some(&2));
        assert_eq!(counts.per_ip.get("b"), Some(&1));
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.lines, 4);
        assert_eq!(counts.parse_errors, 1);
    }

    #[test]
    fn merge_adds_counts() {
        let mut a = count_lines(r#"{"timestamp":"2024-05-01T00:00:00Z","httpRequest":{"remoteIp":"x"}}"#);
        let b = count_lines(r#"{"timestamp":"2024-05-01T00:00:00Z","httpRequest":{"remoteIp":"x"}}"#);
        a.merge(b);
        assert_eq!(a.per_ip.get("x"), Some(&2));
        assert_eq!(a.lines, 2);
    }
}
