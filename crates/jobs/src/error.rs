//! Job 추적 에러 타입
//!
//! `From<JobError> for ModscanError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use modscan_core::error::ModscanError;

/// Job 추적 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Job을 찾을 수 없음
    #[error("job not found: {0}")]
    NotFound(String),

    /// 같은 ID의 Job이 이미 있음
    #[error("job already exists: {0}")]
    AlreadyExists(String),

    /// 다른 작성자가 먼저 갱신함 (재시도 대상)
    #[error("concurrent update conflict on job '{id}' (expected revision {expected})")]
    Conflict {
        /// Job ID
        id: String,
        /// 기대한 리비전
        expected: u64,
    },

    /// 카운터 불변식 위반
    #[error("counter invariant violated on job '{id}': {reason}")]
    CounterInvariant {
        /// Job ID
        id: String,
        /// 위반 내용
        reason: String,
    },

    /// 재시도 횟수 초과
    #[error("gave up updating job '{id}' after {attempts} attempts")]
    RetriesExhausted {
        /// Job ID
        id: String,
        /// 시도 횟수
        attempts: u32,
    },

    /// 저장소 백엔드 에러
    #[error("job store error: {0}")]
    Store(String),
}

impl From<JobError> for ModscanError {
    fn from(err: JobError) -> Self {
        ModscanError::Job(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_modscan_error() {
        let err: ModscanError = JobError::NotFound("alice-240501-1030".to_owned()).into();
        assert!(matches!(err, ModscanError::Job(_)));
        assert!(err.to_string().contains("alice-240501-1030"));
    }

    #[test]
    fn conflict_message_carries_revision() {
        let err = JobError::Conflict {
            id: "j".to_owned(),
            expected: 7,
        };
        assert_eq!(
            err.to_string(),
            "concurrent update conflict on job 'j' (expected revision 7)"
        );
    }
}
