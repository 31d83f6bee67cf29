//! 에러 타입 — 도메인별 에러 정의

/// modscan 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ModscanError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 웨어하우스 에러
    #[error("warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// 오브젝트 스토어 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 스캔 실행 에러
    #[error("scan error: {0}")]
    Scan(String),

    /// 작업(Job) 추적 에러
    #[error("job error: {0}")]
    Job(String),

    /// 요청 수 집계 에러
    #[error("request count error: {0}")]
    ReqCount(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 웨어하우스 에러
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// 등록되지 않은 테이블
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// 배치가 너무 큼 — 호출자는 배치를 나눠 재시도합니다
    #[error("payload too large: {rows} rows")]
    PayloadTooLarge { rows: usize },

    /// 삽입 실패
    #[error("insert into {table} failed: {reason}")]
    Insert { table: String, reason: String },

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),

    /// 행 직렬화 실패
    #[error("row serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// 업로드 데드라인 초과
    #[error("upload to {table} exceeded deadline of {secs}s")]
    Deadline { table: String, secs: u64 },

    /// 백엔드 I/O 에러
    #[error("warehouse io error: {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// 오브젝트 스토어 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 오브젝트 없음
    #[error("object not found: {0}")]
    NotFound(String),

    /// 유효하지 않은 오브젝트 이름
    #[error("invalid object name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// I/O 에러
    #[error("storage io error: {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
