//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 구성 요소는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `watchdata_`
//! - 구성 요소명: `ingest_`, `store_`, `poller_`, `fanout_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(watchdata_core::metrics::INGEST_RECORDS_TOTAL).increment(3);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 저장소 연산 레이블 키 (insert, query_after, query_range)
pub const LABEL_OPERATION: &str = "operation";

/// 에러 분류 레이블 키 (connection, query, insert, timeout)
pub const LABEL_ERROR_KIND: &str = "kind";

/// 속성 필드 레이블 키 (attributes, resource)
pub const LABEL_FIELD: &str = "field";

// ─── Ingest 메트릭 ──────────────────────────────────────────────────

/// Ingest: 저장에 성공한 레코드 수 (counter)
pub const INGEST_RECORDS_TOTAL: &str = "watchdata_ingest_records_total";

/// Ingest: 저장 실패로 거부된 배치 수 (counter)
pub const INGEST_BATCHES_REJECTED_TOTAL: &str = "watchdata_ingest_batches_rejected_total";

// ─── Store 메트릭 ───────────────────────────────────────────────────

/// Store: 저장소 호출 지연 시간 (histogram, 초, label: operation)
pub const STORE_OPERATION_DURATION_SECONDS: &str = "watchdata_store_operation_duration_seconds";

/// Store: 저장소 호출 실패 수 (counter, labels: operation, kind)
pub const STORE_ERRORS_TOTAL: &str = "watchdata_store_errors_total";

/// Store: 잘못된 속성 인코딩으로 빈 속성이 대체된 수 (counter, label: field)
pub const STORE_DECODE_ANOMALIES_TOTAL: &str = "watchdata_store_decode_anomalies_total";

// ─── Poller 메트릭 ──────────────────────────────────────────────────

/// Poller: 완료된 폴링 주기 수 (counter)
pub const POLLER_CYCLES_TOTAL: &str = "watchdata_poller_cycles_total";

/// Poller: 실패한 폴링 주기 수 (counter)
pub const POLLER_ERRORS_TOTAL: &str = "watchdata_poller_errors_total";

/// Poller: 팬아웃으로 전달한 레코드 수 (counter)
pub const POLLER_RECORDS_FORWARDED_TOTAL: &str = "watchdata_poller_records_forwarded_total";

/// Poller: 현재 워터마크 (gauge, Unix epoch 초)
pub const POLLER_WATERMARK_SECONDS: &str = "watchdata_poller_watermark_seconds";

// ─── Fan-out 메트릭 ─────────────────────────────────────────────────

/// Fan-out: 큐가 가득 차 버려진 레코드 수 (counter)
pub const FANOUT_DROPPED_TOTAL: &str = "watchdata_fanout_dropped_total";

/// Fan-out: 구독자에게 쓴 레코드 수 (counter)
pub const FANOUT_DELIVERIES_TOTAL: &str = "watchdata_fanout_deliveries_total";

/// Fan-out: 쓰기 실패로 제거된 구독자 수 (counter)
pub const FANOUT_EVICTIONS_TOTAL: &str = "watchdata_fanout_evictions_total";

/// Fan-out: 현재 연결된 구독자 수 (gauge)
pub const FANOUT_SUBSCRIBERS: &str = "watchdata_fanout_subscribers";

/// Fan-out: 큐에 대기 중인 레코드 수 (gauge)
pub const FANOUT_QUEUE_DEPTH: &str = "watchdata_fanout_queue_depth";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "watchdata_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "watchdata_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 저장소 호출 지연 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 30s 범위, 네트워크 왕복 포함
pub const STORE_DURATION_BUCKETS: [f64; 10] =
    [0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `watchdata-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Ingest
    describe_counter!(
        INGEST_RECORDS_TOTAL,
        "Total number of log records durably stored through the ingest intake"
    );
    describe_counter!(
        INGEST_BATCHES_REJECTED_TOTAL,
        "Total number of ingest batches rejected because the store write failed"
    );

    // Store
    describe_histogram!(
        STORE_OPERATION_DURATION_SECONDS,
        "Column store call latency in seconds"
    );
    describe_counter!(STORE_ERRORS_TOTAL, "Total number of failed column store calls");
    describe_counter!(
        STORE_DECODE_ANOMALIES_TOTAL,
        "Stored attribute encodings that failed to decode and were replaced by an empty set"
    );

    // Poller
    describe_counter!(POLLER_CYCLES_TOTAL, "Total number of change poller cycles");
    describe_counter!(
        POLLER_ERRORS_TOTAL,
        "Total number of change poller cycles that failed to query the store"
    );
    describe_counter!(
        POLLER_RECORDS_FORWARDED_TOTAL,
        "Total number of newly stored records forwarded to the fan-out queue"
    );
    describe_gauge!(
        POLLER_WATERMARK_SECONDS,
        "Timestamp of the most recently forwarded record (Unix seconds)"
    );

    // Fan-out
    describe_counter!(
        FANOUT_DROPPED_TOTAL,
        "Total number of records dropped because the fan-out queue was full"
    );
    describe_counter!(
        FANOUT_DELIVERIES_TOTAL,
        "Total number of record writes to live subscribers"
    );
    describe_counter!(
        FANOUT_EVICTIONS_TOTAL,
        "Total number of subscribers removed after a failed write"
    );
    describe_gauge!(FANOUT_SUBSCRIBERS, "Number of currently registered subscribers");
    describe_gauge!(
        FANOUT_QUEUE_DEPTH,
        "Number of records waiting in the fan-out queue"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "watchdata daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
