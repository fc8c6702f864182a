//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `linehaul_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(linehaul_core::metrics::LINES_PUBLISHED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 라인 스킵 사유 레이블 키 (empty, duplicate)
pub const LABEL_REASON: &str = "reason";

/// tail 리셋 원인 레이블 키 (truncated, rotated)
pub const LABEL_RESET_KIND: &str = "kind";

// ─── Tail 메트릭 ────────────────────────────────────────────────────

/// Tail: 파일에서 읽은 라인 수 (counter)
pub const LINES_READ_TOTAL: &str = "linehaul_lines_read_total";

/// Tail: truncation/rotation으로 오프셋이 리셋된 횟수 (counter, label: kind)
pub const TAIL_RESETS_TOTAL: &str = "linehaul_tail_resets_total";

/// Tail: 소스 I/O 에러 수 (counter)
pub const SOURCE_ERRORS_TOTAL: &str = "linehaul_source_errors_total";

// ─── Forwarding 메트릭 ──────────────────────────────────────────────

/// Forwarding: 발행된 라인 수 (counter)
pub const LINES_PUBLISHED_TOTAL: &str = "linehaul_lines_published_total";

/// Forwarding: 중복으로 억제된 라인 수 (counter)
pub const LINES_DUPLICATE_TOTAL: &str = "linehaul_lines_duplicate_total";

/// Forwarding: 빈 라인 등으로 건너뛴 라인 수 (counter, label: reason)
pub const LINES_SKIPPED_TOTAL: &str = "linehaul_lines_skipped_total";

/// Forwarding: 발행 실패 수 (counter)
pub const PUBLISH_FAILURES_TOTAL: &str = "linehaul_publish_failures_total";

/// Forwarding: 발행 지연 시간 (histogram, 초)
pub const PUBLISH_DURATION_SECONDS: &str = "linehaul_publish_duration_seconds";

// ─── Dedup 메트릭 ───────────────────────────────────────────────────

/// Dedup: 메모리에 유지 중인 지문 수 (gauge)
pub const DEDUP_ENTRIES: &str = "linehaul_dedup_entries";

/// Dedup: 용량 초과로 메모리에서 축출된 지문 수 (counter)
pub const DEDUP_EVICTIONS_TOTAL: &str = "linehaul_dedup_evictions_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 전역 recorder 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(LINES_READ_TOTAL, "Total number of lines read from the tailed file");
    describe_counter!(
        TAIL_RESETS_TOTAL,
        "Number of times the tail offset was reset by truncation or rotation"
    );
    describe_counter!(SOURCE_ERRORS_TOTAL, "Total number of tail source I/O errors");

    describe_counter!(
        LINES_PUBLISHED_TOTAL,
        "Total number of lines published to the broker"
    );
    describe_counter!(
        LINES_DUPLICATE_TOTAL,
        "Total number of lines suppressed as duplicates"
    );
    describe_counter!(
        LINES_SKIPPED_TOTAL,
        "Total number of lines skipped before deduplication"
    );
    describe_counter!(PUBLISH_FAILURES_TOTAL, "Total number of failed publishes");
    describe_histogram!(PUBLISH_DURATION_SECONDS, "Broker publish latency in seconds");

    describe_gauge!(DEDUP_ENTRIES, "Fingerprints currently held in memory");
    describe_counter!(
        DEDUP_EVICTIONS_TOTAL,
        "Fingerprints evicted from memory by capacity pressure"
    );
}
