//! 페이지 단위 로그 항목 집계
//!
//! [`LogEntrySource`]는 날짜별 로그 항목을 페이지로 돌려줍니다. 쿼터가
//! 소진되면 [`count_log_entries`]는 고정 시간 대기 후 같은 페이지 토큰으로
//! 다시 요청하므로 처음부터 다시 읽지 않습니다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, warn};

use modscan_core::metrics as m;
use modscan_core::storage::ObjectStore;

use crate::bucket::{DayCounts, day_prefix};
use crate::error::ReqCountError;
use crate::logline::count_lines;

/// 쿼터 소진 시 기본 대기 시간
pub const DEFAULT_QUOTA_BACKOFF: Duration = Duration::from_secs(5);

/// 로그 항목 한 페이지
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPage {
    /// 로그 줄 (JSON 객체 하나씩)
    pub entries: Vec<String>,
    /// 다음 페이지 토큰 (마지막 페이지면 `None`)
    pub next_page_token: Option<String>,
}

/// 로그 항목 공급원
pub trait LogEntrySource: Send + Sync {
    /// 페이지 하나를 가져옵니다. 쿼터가 소진되면 `ReqCountError::QuotaExhausted`.
    fn fetch_page(
        &self,
        date: NaiveDate,
        page_token: Option<&str>,
    ) -> impl Future<Output = Result<LogPage, ReqCountError>> + Send;
}

/// 하루치 로그 항목을 모두 읽어 집계합니다.
///
/// 쿼터 소진은 횟수 제한 없이 `backoff`마다 재시도합니다.
pub async fn count_log_entries<L: LogEntrySource>(
    source: &L,
    date: NaiveDate,
    backoff: Duration,
) -> Result<DayCounts, ReqCountError> {
    let mut result = DayCounts::default();
    let mut token: Option<String> = None;

    loop {
        let page = match source.fetch_page(date, token.as_deref()).await {
            Ok(page) => page,
            Err(ReqCountError::QuotaExhausted) => {
                metrics::counter!(m::REQCOUNT_QUOTA_RETRIES_TOTAL).increment(1);
                warn!(
                    date = %date,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "log entry quota exhausted, retrying page"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }
            Err(e) => return Err(e),
        };

        let counts = count_lines(&page.entries.join("\n"));
        metrics::counter!(m::REQCOUNT_LINES_PARSED_TOTAL).increment(counts.lines);
        result.counts.merge(counts);
        result.objects += 1;

        match page.next_page_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }

    debug!(date = %date, pages = result.objects, total = result.counts.total(), "log entries counted");
    Ok(result)
}

/// 오브젝트 스토어의 하루치 오브젝트를 한 페이지씩 돌려주는 공급원
///
/// 페이지 토큰은 다음에 읽을 오브젝트 이름입니다.
#[derive(Debug)]
pub struct ObjectPages<S> {
    store: Arc<S>,
    prefix: String,
}

impl<S: ObjectStore> ObjectPages<S> {
    /// 공급원을 생성합니다.
    pub fn new(store: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }
}

impl<S: ObjectStore> LogEntrySource for ObjectPages<S> {
    async fn fetch_page(
        &self,
        date: NaiveDate,
        page_token: Option<&str>,
    ) -> Result<LogPage, ReqCountError> {
        let names: Vec<String> = self
            .store
            .list(&day_prefix(&self.prefix, date))
            .await?
            .into_iter()
            .filter(|n| n.ends_with(".json"))
            .collect();

        let index = match page_token {
            None => 0,
            Some(token) => names.iter().position(|n| n == token).ok_or_else(|| {
                ReqCountError::Source(format!("unknown page token '{token}'"))
            })?,
        };
        let Some(name) = names.get(index) else {
            return Ok(LogPage::default());
        };

        let data = self.store.read(name).await?;
        Ok(LogPage {
            entries: String::from_utf8_lossy(&data)
                .lines()
                .map(str::to_owned)
                .collect(),
            next_page_token: names.get(index + 1).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 페이지 2개, 첫 요청 두 번째 페이지에서 쿼터를 한 번 소진
    struct FlakySource {
        calls: AtomicUsize,
        quota_failures: AtomicUsize,
        tokens: std::sync::Mutex<Vec<Option<String>>>,
    }

    impl FlakySource {
        fn new(quota_failures: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                quota_failures: AtomicUsize::new(quota_failures),
                tokens: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    fn line(ip: &str) -> String {
        format!(r#"{{"timestamp":"2024-05-01T00:00:00Z","httpRequest":{{"remoteIp":"{ip}"}}}}"#)
    }

    impl LogEntrySource for FlakySource {
        async fn fetch_page(
            &self,
            _date: NaiveDate,
            page_token: Option<&str>,
        ) -> Result<LogPage, ReqCountError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens.lock().unwrap().push(page_token.map(str::to_owned));
            match page_token {
                None => Ok(LogPage {
                    entries: vec![line("a"), line("b")],
                    next_page_token: Some("p2".to_owned()),
                }),
                Some("p2") => {
                    if self
                        .quota_failures
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok()
                    {
                        return Err(ReqCountError::QuotaExhausted);
                    }
                    Ok(LogPage {
                        entries: vec![line("a")],
                        next_page_token: None,
                    })
                }
                Some(other) => Err(ReqCountError::Source(other.to_owned())),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn quota_retry_resumes_same_page() {
        let source = FlakySource::new(2);
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let started = tokio::time::Instant::now();

        let result = count_log_entries(&source, date, DEFAULT_QUOTA_BACKOFF)
            .await
            .unwrap();
        assert_eq!(result.counts.per_ip.get("a"), Some(&2));
        assert_eq!(result.counts.total(), 3);
        assert_eq!(result.objects, 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        let tokens = source.tokens.lock().unwrap().clone();
        assert_eq!(
            tokens,
            vec![
                None,
                Some("p2".to_owned()),
                Some("p2".to_owned()),
                Some("p2".to_owned())
            ]
        );
        assert!(started.elapsed() >= DEFAULT_QUOTA_BACKOFF * 2);
    }

    #[tokio::test]
    async fn other_errors_propagate() {
        struct Broken;
        impl LogEntrySource for Broken {
            async fn fetch_page(
                &self,
                _date: NaiveDate,
                _page_token: Option<&str>,
            ) -> Result<LogPage, ReqCountError> {
                Err(ReqCountError::Source("permission denied".to_owned()))
            }
        }
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let err = count_log_entries(&Broken, date, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReqCountError::Source(_)));
    }
}
