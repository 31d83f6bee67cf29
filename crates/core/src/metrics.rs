//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `modscan_`
//! - 모듈명: `scanner_`, `warehouse_`, `jobs_`, `reqcount_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), `_bytes`, 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(modscan_core::metrics::SCANNER_SCANS_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 스캔 모드 레이블 키 (source, binary, compare, analysis)
pub const LABEL_MODE: &str = "mode";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 테이블 레이블 키
pub const LABEL_TABLE: &str = "table";

/// 태스크 결과 레이블 키 (skipped, failed, errored, succeeded)
pub const LABEL_OUTCOME: &str = "outcome";

/// 에러 분류 레이블 키
pub const LABEL_CATEGORY: &str = "category";

// ─── Scanner 메트릭 ────────────────────────────────────────────────

/// Scanner: 완료된 스캔 수 (counter, labels: mode, result)
pub const SCANNER_SCANS_TOTAL: &str = "modscan_scanner_scans_total";

/// Scanner: 스캔 소요 시간 (histogram, 초, label: mode)
pub const SCANNER_SCAN_DURATION_SECONDS: &str = "modscan_scanner_scan_duration_seconds";

/// Scanner: 스캔 프로세스 최대 메모리 (histogram, 바이트)
pub const SCANNER_PEAK_MEMORY_BYTES: &str = "modscan_scanner_peak_memory_bytes";

/// Scanner: 발견된 취약점 행 수 (counter)
pub const SCANNER_FINDINGS_TOTAL: &str = "modscan_scanner_findings_total";

/// Scanner: 분류된 스캔 에러 수 (counter, label: category)
pub const SCANNER_ERRORS_TOTAL: &str = "modscan_scanner_errors_total";

/// Scanner: 바이너리 빌드 실패 수 (counter)
pub const SCANNER_BUILD_FAILURES_TOTAL: &str = "modscan_scanner_build_failures_total";

/// Scanner: 샌드박스 타임아웃 수 (counter)
pub const SCANNER_SANDBOX_TIMEOUTS_TOTAL: &str = "modscan_scanner_sandbox_timeouts_total";

// ─── Warehouse 메트릭 ──────────────────────────────────────────────

/// Warehouse: 업로드된 행 수 (counter, label: table)
pub const WAREHOUSE_ROWS_UPLOADED_TOTAL: &str = "modscan_warehouse_rows_uploaded_total";

/// Warehouse: 크기 초과로 분할된 배치 수 (counter, label: table)
pub const WAREHOUSE_BATCH_SPLITS_TOTAL: &str = "modscan_warehouse_batch_splits_total";

/// Warehouse: 업로드 실패 수 (counter, label: table)
pub const WAREHOUSE_UPLOAD_FAILURES_TOTAL: &str = "modscan_warehouse_upload_failures_total";

// ─── Jobs 메트릭 ────────────────────────────────────────────────────

/// Jobs: 큐에 추가된 태스크 수 (counter)
pub const JOBS_TASKS_ENQUEUED_TOTAL: &str = "modscan_jobs_tasks_enqueued_total";

/// Jobs: 종료된 태스크 수 (counter, label: outcome)
pub const JOBS_TASKS_FINISHED_TOTAL: &str = "modscan_jobs_tasks_finished_total";

/// Jobs: 현재 실행 중인 태스크 수 (gauge)
pub const JOBS_TASKS_IN_FLIGHT: &str = "modscan_jobs_tasks_in_flight";

/// Jobs: Job 갱신 충돌(CAS 실패) 수 (counter)
pub const JOBS_UPDATE_CONFLICTS_TOTAL: &str = "modscan_jobs_update_conflicts_total";

// ─── Request Count 메트릭 ──────────────────────────────────────────

/// ReqCount: 파싱된 로그 라인 수 (counter)
pub const REQCOUNT_LINES_PARSED_TOTAL: &str = "modscan_reqcount_lines_parsed_total";

/// ReqCount: 파싱 실패 라인 수 (counter)
pub const REQCOUNT_PARSE_ERRORS_TOTAL: &str = "modscan_reqcount_parse_errors_total";

/// ReqCount: 쿼터 소진으로 인한 재시도 수 (counter)
pub const REQCOUNT_QUOTA_RETRIES_TOTAL: &str = "modscan_reqcount_quota_retries_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "modscan_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, labels: version, commit)
pub const DAEMON_BUILD_INFO: &str = "modscan_daemon_build_info";

/// Daemon: 워커 수 (gauge)
pub const DAEMON_WORKERS: &str = "modscan_daemon_workers";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 스캔 소요 시간 히스토그램 버킷 (초)
///
/// 1s ~ 1h 범위 (모듈 다운로드와 빌드 포함)
pub const SCAN_DURATION_BUCKETS: [f64; 9] =
    [1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0, 3600.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `modscan-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Scanner
    describe_counter!(
        SCANNER_SCANS_TOTAL,
        "Total number of scans completed, by mode and result"
    );
    describe_histogram!(
        SCANNER_SCAN_DURATION_SECONDS,
        "Wall-clock time of a single scan in seconds"
    );
    describe_histogram!(
        SCANNER_PEAK_MEMORY_BYTES,
        "Peak resident memory of the scanning subprocess in bytes"
    );
    describe_counter!(
        SCANNER_FINDINGS_TOTAL,
        "Total number of vulnerability rows produced by scans"
    );
    describe_counter!(
        SCANNER_ERRORS_TOTAL,
        "Total number of scan errors, by category"
    );
    describe_counter!(
        SCANNER_BUILD_FAILURES_TOTAL,
        "Total number of failed main-package builds"
    );
    describe_counter!(
        SCANNER_SANDBOX_TIMEOUTS_TOTAL,
        "Total number of sandboxed scans killed by the hard timeout"
    );

    // Warehouse
    describe_counter!(
        WAREHOUSE_ROWS_UPLOADED_TOTAL,
        "Total number of rows written to the warehouse, by table"
    );
    describe_counter!(
        WAREHOUSE_BATCH_SPLITS_TOTAL,
        "Total number of insert batches split after a payload-too-large error"
    );
    describe_counter!(
        WAREHOUSE_UPLOAD_FAILURES_TOTAL,
        "Total number of failed warehouse uploads"
    );

    // Jobs
    describe_counter!(
        JOBS_TASKS_ENQUEUED_TOTAL,
        "Total number of tasks put on the work queue"
    );
    describe_counter!(
        JOBS_TASKS_FINISHED_TOTAL,
        "Total number of tasks finished, by outcome"
    );
    describe_gauge!(
        JOBS_TASKS_IN_FLIGHT,
        "Number of tasks currently being processed by workers"
    );
    describe_counter!(
        JOBS_UPDATE_CONFLICTS_TOTAL,
        "Total number of job updates retried after a concurrent modification"
    );

    // Request counts
    describe_counter!(
        REQCOUNT_LINES_PARSED_TOTAL,
        "Total number of access-log lines parsed"
    );
    describe_counter!(
        REQCOUNT_PARSE_ERRORS_TOTAL,
        "Total number of access-log lines that failed to parse"
    );
    describe_counter!(
        REQCOUNT_QUOTA_RETRIES_TOTAL,
        "Total number of log-entry page fetches retried after quota exhaustion"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "modscan daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version/commit labels)"
    );
    describe_gauge!(DAEMON_WORKERS, "Number of scan workers in the pool");
}
