//! Job 저장소와 낙관적 동시성 갱신
//!
//! 여러 태스크가 같은 Job 카운터를 동시에 갱신하므로 모든 갱신은
//! 리비전 비교 후 쓰기(compare-and-swap)로 적용합니다.
//!
//! ```text
//! get_versioned(id) --> (job, rev)
//!        |
//!   f(&mut job)              에러면 쓰지 않고 반환
//!        |
//! put_if_version(job, rev) --Conflict--> backoff 후 처음부터 재시도
//!        |
//!       Ok
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use modscan_core::metrics as m;

use crate::error::JobError;
use crate::job::Job;

/// 기본 CAS 재시도 횟수
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// 재시도 간 기본 대기 단위 (시도 횟수만큼 곱함)
const BACKOFF_BASE: Duration = Duration::from_millis(10);

/// 리비전이 붙은 값
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// 저장소 리비전
    pub revision: u64,
    /// 값
    pub value: T,
}

/// Job 저장소
///
/// 구현체는 `put_if_version`에서 저장된 리비전이 `revision`과 다르면
/// [`JobError::Conflict`]를 반환해야 합니다.
pub trait JobStore: Send + Sync + 'static {
    /// 새 Job을 저장합니다. 같은 ID가 있으면 `AlreadyExists`.
    fn create(&self, job: Job) -> impl Future<Output = Result<(), JobError>> + Send;

    /// Job을 조회합니다.
    fn get(&self, id: &str) -> impl Future<Output = Result<Job, JobError>> + Send;

    /// 모든 Job을 시작 시각 내림차순으로 조회합니다.
    fn list(&self) -> impl Future<Output = Result<Vec<Job>, JobError>> + Send;

    /// Job과 리비전을 조회합니다.
    fn get_versioned(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Versioned<Job>, JobError>> + Send;

    /// 리비전이 같을 때만 씁니다. 새 리비전을 반환합니다.
    fn put_if_version(
        &self,
        job: Job,
        revision: u64,
    ) -> impl Future<Output = Result<u64, JobError>> + Send;
}

/// 인메모리 Job 저장소
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Versioned<Job>>>,
    injected_conflicts: AtomicU32,
}

impl MemoryJobStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 `n`번의 `put_if_version`이 충돌하도록 합니다 (테스트용).
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(JobError::AlreadyExists(job.id));
        }
        jobs.insert(
            job.id.clone(),
            Versioned {
                revision: 1,
                value: job,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Job, JobError> {
        Ok(self.get_versioned(id).await?.value)
    }

    async fn list(&self) -> Result<Vec<Job>, JobError> {
        let jobs = self.jobs.lock().await;
        let mut list: Vec<Job> = jobs.values().map(|v| v.value.clone()).collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn get_versioned(&self, id: &str) -> Result<Versioned<Job>, JobError> {
        self.jobs
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_owned()))
    }

    async fn put_if_version(&self, job: Job, revision: u64) -> Result<u64, JobError> {
        if self.take_injected_conflict() {
            return Err(JobError::Conflict {
                id: job.id,
                expected: revision,
            });
        }
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(&job.id)
            .ok_or_else(|| JobError::NotFound(job.id.clone()))?;
        if entry.revision != revision {
            return Err(JobError::Conflict {
                id: job.id,
                expected: revision,
            });
        }
        entry.revision += 1;
        entry.value = job;
        Ok(entry.revision)
    }
}

/// 콜백의 결정
enum Step<T> {
    /// 수정한 Job을 쓰고 값을 반환
    Write(T),
    /// 쓰지 않고 값을 반환
    Keep(T),
}

async fn cas_loop<S, F, T>(
    store: &S,
    id: &str,
    max_attempts: u32,
    mut f: F,
) -> Result<(Job, T), JobError>
where
    S: JobStore,
    F: FnMut(&mut Job) -> Result<Step<T>, JobError> + Send,
    T: Send,
{
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let Versioned {
            revision,
            value: mut job,
        } = store.get_versioned(id).await?;

        let out = match f(&mut job)? {
            Step::Keep(out) => return Ok((job, out)),
            Step::Write(out) => out,
        };

        match store.put_if_version(job.clone(), revision).await {
            Ok(_) => return Ok((job, out)),
            Err(JobError::Conflict { .. }) => {
                metrics::counter!(m::JOBS_UPDATE_CONFLICTS_TOTAL).increment(1);
                debug!(job_id = id, attempt, "job update conflict, retrying");
                tokio::time::sleep(BACKOFF_BASE * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }

    warn!(job_id = id, attempts = max_attempts, "job update retries exhausted");
    Err(JobError::RetriesExhausted {
        id: id.to_owned(),
        attempts: max_attempts,
    })
}

/// Job을 읽고, `f`로 수정하고, 조건부로 씁니다. 충돌하면 다시 읽어 재시도합니다.
///
/// `f`가 에러를 반환하면 아무것도 쓰지 않고 그 에러를 반환합니다.
/// `f`는 재시도마다 새로 읽은 Job으로 다시 호출됩니다.
pub async fn update_job<S, F>(
    store: &S,
    id: &str,
    max_attempts: u32,
    mut f: F,
) -> Result<Job, JobError>
where
    S: JobStore,
    F: FnMut(&mut Job) -> Result<(), JobError> + Send,
{
    let (job, ()) = cas_loop(store, id, max_attempts, |job| f(job).map(Step::Write)).await?;
    Ok(job)
}

/// 태스크 시작 허가 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Job이 취소되어 시작하지 않음 (카운터 변화 없음)
    Canceled,
    /// 시작 카운터를 올림
    Started,
}

/// 취소 여부를 확인하고, 취소되지 않았으면 시작 카운터를 올립니다.
///
/// 확인과 증가는 한 번의 CAS로 적용되므로 취소 직후의 태스크가
/// 시작 카운터를 올리는 일은 없습니다.
pub async fn admit_task<S: JobStore>(
    store: &S,
    id: &str,
    max_attempts: u32,
) -> Result<Admission, JobError> {
    let (_, admission) = cas_loop(store, id, max_attempts, |job| {
        if job.canceled {
            return Ok(Step::Keep(Admission::Canceled));
        }
        job.record_start()?;
        Ok(Step::Write(Admission::Started))
    })
    .await?;
    Ok(admission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TaskOutcome;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn job(user: &str, minute: u32, enqueued: u64) -> Job {
        let mut job = Job::new(
            user,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
            "/vulncheck/enqueue",
        );
        job.record_enqueued(enqueued);
        job
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = MemoryJobStore::new();
        store.create(job("alice", 1, 1)).await.unwrap();
        let err = store.create(job("alice", 1, 5)).await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyExists(id) if id == "alice-240501-1001"));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = MemoryJobStore::new();
        store.create(job("alice", 1, 1)).await.unwrap();
        store.create(job("bob", 5, 1)).await.unwrap();
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["bob-240501-1005", "alice-240501-1001"]);
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let store = MemoryJobStore::new();
        let j = job("alice", 1, 1);
        store.create(j.clone()).await.unwrap();
        let rev = store.put_if_version(j.clone(), 1).await.unwrap();
        assert_eq!(rev, 2);
        let err = store.put_if_version(j, 1).await.unwrap_err();
        assert!(matches!(err, JobError::Conflict { expected: 1, .. }));
    }

    #[tokio::test]
    async fn update_retries_on_conflict() {
        let store = MemoryJobStore::new();
        store.create(job("alice", 1, 3)).await.unwrap();
        store.inject_conflicts(2);

        let mut calls = 0;
        let updated = update_job(&store, "alice-240501-1001", 5, |j| {
            calls += 1;
            j.record_start()
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(updated.num_started, 1);
        assert_eq!(store.get("alice-240501-1001").await.unwrap().num_started, 1);
    }

    #[tokio::test]
    async fn update_gives_up_after_max_attempts() {
        let store = MemoryJobStore::new();
        store.create(job("alice", 1, 3)).await.unwrap();
        store.inject_conflicts(10);
        let err = update_job(&store, "alice-240501-1001", 3, |j| j.record_start())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(store.get("alice-240501-1001").await.unwrap().num_started, 0);
    }

    #[tokio::test]
    async fn callback_error_writes_nothing() {
        let store = MemoryJobStore::new();
        store.create(job("alice", 1, 0)).await.unwrap();
        let err = update_job(&store, "alice-240501-1001", 3, |j| j.record_start())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::CounterInvariant { .. }));
        let v = store.get_versioned("alice-240501-1001").await.unwrap();
        assert_eq!(v.revision, 1);
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let store = MemoryJobStore::new();
        let err = update_job(&store, "nobody-240501-1001", 3, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn canceled_job_admits_nothing() {
        let store = MemoryJobStore::new();
        store.create(job("alice", 1, 2)).await.unwrap();
        let id = "alice-240501-1001";

        assert_eq!(admit_task(&store, id, 3).await.unwrap(), Admission::Started);
        update_job(&store, id, 3, |j| {
            j.cancel();
            Ok(())
        })
        .await
        .unwrap();
        let before = store.get_versioned(id).await.unwrap();
        assert_eq!(admit_task(&store, id, 3).await.unwrap(), Admission::Canceled);
        let after = store.get_versioned(id).await.unwrap();
        assert_eq!(before, after);

        // 이미 시작된 태스크는 끝까지 기록됩니다
        update_job(&store, id, 3, |j| j.record_finish(TaskOutcome::Succeeded))
            .await
            .unwrap();
        assert_eq!(store.get(id).await.unwrap().num_succeeded, 1);
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryJobStore::new());
        store.create(job("alice", 1, 50)).await.unwrap();
        let id = "alice-240501-1001";

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                admit_task(store.as_ref(), id, 100).await.unwrap();
                update_job(store.as_ref(), id, 100, |j| {
                    j.record_finish(TaskOutcome::Succeeded)
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let j = store.get(id).await.unwrap();
        assert_eq!(j.num_started, 50);
        assert_eq!(j.num_succeeded, 50);
    }
}
