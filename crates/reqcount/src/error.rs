//! 요청 수 집계 에러 타입

use modscan_core::error::{ModscanError, StorageError, WarehouseError};

/// 요청 수 집계 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ReqCountError {
    /// 로그 줄 파싱 실패
    #[error("log line parse error: {0}")]
    Parse(String),

    /// 로그 항목 API 쿼터 소진 (재시도 대상)
    #[error("log entry quota exhausted")]
    QuotaExhausted,

    /// 로그 항목 공급원 에러
    #[error("log entry source error: {0}")]
    Source(String),

    /// 오브젝트 스토어 에러
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// 웨어하우스 에러
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// 백그라운드 태스크 실패
    #[error("task failed: {0}")]
    Task(String),
}

impl From<ReqCountError> for ModscanError {
    fn from(err: ReqCountError) -> Self {
        match err {
            ReqCountError::Storage(e) => ModscanError::Storage(e),
            ReqCountError::Warehouse(e) => ModscanError::Warehouse(e),
            other => ModscanError::ReqCount(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_keep_their_category() {
        let err: ModscanError =
            ReqCountError::Storage(StorageError::NotFound("logs/x.json".to_owned())).into();
        assert!(matches!(err, ModscanError::Storage(_)));

        let err: ModscanError = ReqCountError::QuotaExhausted.into();
        assert!(matches!(err, ModscanError::ReqCount(_)));
    }
}
