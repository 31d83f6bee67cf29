//! 로그 버킷 일별 집계
//!
//! 하루치 오브젝트(`<prefix>/YYYY/MM/DD/*.json`)를 나열하고, 세마포어로
//! 동시 읽기 수를 제한하며 `JoinSet`으로 병렬 처리합니다. 각 오브젝트의
//! 집계는 공유 맵에 합칩니다.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use modscan_core::metrics as m;
use modscan_core::storage::ObjectStore;

use crate::error::ReqCountError;
use crate::logline::{LineCounts, count_lines};

/// 기본 동시 읽기 상한
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// 날짜의 오브젝트 접두어 (`<prefix>/YYYY/MM/DD/`)
pub fn day_prefix(prefix: &str, date: NaiveDate) -> String {
    let prefix = prefix.trim_end_matches('/');
    let day = date.format("%Y/%m/%d");
    if prefix.is_empty() {
        format!("{day}/")
    } else {
        format!("{prefix}/{day}/")
    }
}

/// 하루 집계 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayCounts {
    /// 줄 집계
    pub counts: LineCounts,
    /// 읽은 오브젝트 수
    pub objects: usize,
}

fn record_line_metrics(counts: &LineCounts) {
    metrics::counter!(m::REQCOUNT_LINES_PARSED_TOTAL).increment(counts.lines);
    if counts.parse_errors > 0 {
        metrics::counter!(m::REQCOUNT_PARSE_ERRORS_TOTAL).increment(counts.parse_errors);
    }
}

/// 버킷의 하루치 로그를 집계합니다.
///
/// 동시에 읽는 오브젝트 수는 `max_concurrency`(0이면 1)를 넘지 않습니다.
/// 오브젝트 하나라도 읽지 못하면 에러를 반환합니다.
pub async fn count_bucket_day<S: ObjectStore>(
    store: Arc<S>,
    prefix: &str,
    date: NaiveDate,
    max_concurrency: usize,
) -> Result<DayCounts, ReqCountError> {
    let day = day_prefix(prefix, date);
    let names: Vec<String> = store
        .list(&day)
        .await?
        .into_iter()
        .filter(|n| n.ends_with(".json"))
        .collect();
    debug!(prefix = %day, objects = names.len(), "listed log objects");

    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let merged = Arc::new(Mutex::new(LineCounts::default()));
    let mut tasks = JoinSet::new();

    for name in &names {
        let store = Arc::clone(&store);
        let semaphore = Arc::clone(&semaphore);
        let merged = Arc::clone(&merged);
        let name = name.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| ReqCountError::Task(e.to_string()))?;
            let data = store.read(&name).await?;
            let counts = count_lines(&String::from_utf8_lossy(&data));
            if counts.parse_errors > 0 {
                warn!(object = %name, errors = counts.parse_errors, "malformed log lines");
            }
            record_line_metrics(&counts);
            merged.lock().await.merge(counts);
            Ok::<_, ReqCountError>(())
        });
    }

    while let Some(joined) = tasks.join_next().await {
        joined.map_err(|e| ReqCountError::Task(e.to_string()))??;
    }

    let counts = std::mem::take(&mut *merged.lock().await);
    info!(
        date = %date,
        objects = names.len(),
        ips = counts.per_ip.len(),
        total = counts.total(),
        "bucket day counted"
    );
    Ok(DayCounts {
        counts,
        objects: names.len(),
    })
}
