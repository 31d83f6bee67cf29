//! Job 모델, 카운터, 상태, ETA
//!
//! # 불변식
//!
//! 모든 카운터 갱신 후 다음이 성립합니다.
//!
//! - `num_started <= num_enqueued`
//! - `num_finished() <= num_started`
//!
//! 위반하는 갱신은 [`JobError::CounterInvariant`]로 거부되며 Job은 변경되지 않습니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Job ID를 만듭니다 (`{user}-{yymmdd-HHMM}`).
///
/// 분 단위 해상도이므로 같은 사용자가 같은 분에 만든 Job은 같은 ID를 가집니다.
/// 저장소의 `create`가 이 충돌을 `AlreadyExists`로 거부합니다.
pub fn job_id(user: &str, started_at: DateTime<Utc>) -> String {
    format!("{user}-{}", started_at.format("%y%m%d-%H%M"))
}

/// 태스크 종료 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    /// 이전 결과가 최신이라 건너뜀
    Skipped,
    /// 인프라 실패 (웨어하우스, 스토어 등)
    Failed,
    /// 스캔은 끝났지만 결과 행에 에러가 기록됨
    Errored,
    /// 성공
    Succeeded,
}

impl TaskOutcome {
    /// 메트릭/로그 레이블
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Succeeded => "succeeded",
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job 상태. 취소 여부는 별도 플래그입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// 시작된 태스크 없음
    Created,
    /// 하나 이상 시작됨
    Running,
    /// 모든 태스크 종료
    Finished,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Finished => "finished",
        })
    }
}

/// 남은 시간 추정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// 종료되었거나 취소됨
    Done,
    /// 아직 끝난 태스크가 없어 추정 불가
    Unknown,
    /// 남은 분
    Minutes(u64),
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("Done"),
            Self::Unknown => f.write_str("unknown"),
            Self::Minutes(n) => write!(f, "{n} min"),
        }
    }
}

/// 관련된 스캔 태스크 묶음
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID
    pub id: String,
    /// 요청 사용자
    pub user: String,
    /// 시작 시각
    pub started_at: DateTime<Utc>,
    /// Job을 만든 요청 URL
    pub url: String,
    /// 분석 바이너리 이름 (vulncheck Job이면 빈 문자열)
    #[serde(default)]
    pub binary: String,
    /// 분석 바이너리 해시
    #[serde(default)]
    pub binary_version: String,
    /// 분석 바이너리 인자
    #[serde(default)]
    pub binary_args: Vec<String>,
    /// 취소 여부
    #[serde(default)]
    pub canceled: bool,
    pub num_enqueued: u64,
    pub num_started: u64,
    pub num_skipped: u64,
    pub num_failed: u64,
    pub num_errored: u64,
    pub num_succeeded: u64,
}

/// 표시용 필드 접근자
pub type FieldFn = fn(&Job) -> String;

impl Job {
    /// 표시 순서대로 나열한 `(레이블, 값)` 목록
    pub const FIELDS: &'static [(&'static str, FieldFn)] = &[
        ("ID", |j| j.id.clone()),
        ("User", |j| j.user.clone()),
        ("Started", |j| j.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ("URL", |j| j.url.clone()),
        ("Binary", |j| j.binary.clone()),
        ("Binary Version", |j| j.binary_version.clone()),
        ("Binary Args", |j| j.binary_args.join(" ")),
        ("Canceled", |j| j.canceled.to_string()),
        ("State", |j| j.state().to_string()),
        ("Enqueued", |j| j.num_enqueued.to_string()),
        ("Started Tasks", |j| j.num_started.to_string()),
        ("Skipped", |j| j.num_skipped.to_string()),
        ("Failed", |j| j.num_failed.to_string()),
        ("Errored", |j| j.num_errored.to_string()),
        ("Succeeded", |j| j.num_succeeded.to_string()),
        ("Finished", |j| j.num_finished().to_string()),
    ];

    /// 카운터가 모두 0인 Job을 생성합니다.
    pub fn new(user: impl Into<String>, started_at: DateTime<Utc>, url: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            id: job_id(&user, started_at),
            user,
            started_at,
            url: url.into(),
            binary: String::new(),
            binary_version: String::new(),
            binary_args: Vec::new(),
            canceled: false,
            num_enqueued: 0,
            num_started: 0,
            num_skipped: 0,
            num_failed: 0,
            num_errored: 0,
            num_succeeded: 0,
        }
    }

    /// 분석 바이너리 정보를 지정합니다.
    pub fn with_binary(
        mut self,
        binary: impl Into<String>,
        version: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        self.binary = binary.into();
        self.binary_version = version.into();
        self.binary_args = args;
        self
    }

    /// 종료된 태스크 수
    pub fn num_finished(&self) -> u64 {
        self.num_skipped + self.num_failed + self.num_errored + self.num_succeeded
    }

    /// 현재 상태
    pub fn state(&self) -> JobState {
        if self.num_enqueued > 0 && self.num_finished() >= self.num_enqueued {
            JobState::Finished
        } else if self.num_started > 0 {
            JobState::Running
        } else {
            JobState::Created
        }
    }

    /// 추가된 태스크 수를 늘립니다.
    pub fn record_enqueued(&mut self, n: u64) {
        self.num_enqueued = self.num_enqueued.saturating_add(n);
    }

    /// 태스크 하나의 시작을 기록합니다.
    pub fn record_start(&mut self) -> Result<(), JobError> {
        if self.num_started >= self.num_enqueued {
            return Err(self.invariant(format!(
                "start would exceed enqueued count ({} >= {})",
                self.num_started, self.num_enqueued
            )));
        }
        self.num_started += 1;
        Ok(())
    }

    /// 태스크 하나의 종료를 기록합니다.
    pub fn record_finish(&mut self, outcome: TaskOutcome) -> Result<(), JobError> {
        if self.num_finished() >= self.num_started {
            return Err(self.invariant(format!(
                "finish would exceed started count ({} >= {})",
                self.num_finished(),
                self.num_started
            )));
        }
        let counter = match outcome {
            TaskOutcome::Skipped => &mut self.num_skipped,
            TaskOutcome::Failed => &mut self.num_failed,
            TaskOutcome::Errored => &mut self.num_errored,
            TaskOutcome::Succeeded => &mut self.num_succeeded,
        };
        *counter += 1;
        Ok(())
    }

    /// 취소합니다. 여러 번 호출해도 결과는 같습니다.
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    /// 남은 시간 추정
    ///
    /// `remaining / (finished / elapsed)`를 분 단위로 반올림합니다.
    pub fn eta(&self, now: DateTime<Utc>) -> Eta {
        let finished = self.num_finished();
        if self.canceled || finished >= self.num_enqueued {
            return Eta::Done;
        }
        let elapsed = (now - self.started_at).num_milliseconds();
        if finished == 0 || elapsed <= 0 {
            return Eta::Unknown;
        }

        // 카운터와 경과 시간은 f64 정밀도 안에 충분히 들어옵니다
        #[allow(clippy::cast_precision_loss)]
        let (remaining, finished, elapsed_secs) = (
            (self.num_enqueued - finished) as f64,
            finished as f64,
            elapsed as f64 / 1000.0,
        );
        let rate = finished / elapsed_secs;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let minutes = (remaining / rate / 60.0).round() as u64;
        Eta::Minutes(minutes)
    }

    fn invariant(&self, reason: String) -> JobError {
        JobError::CounterInvariant {
            id: self.id.clone(),
            reason,
        }
    }
}
