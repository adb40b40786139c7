//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `ironbot_`
//! - 대상: `unit_`, `resolution_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(ironbot_core::metrics::UNIT_STARTS_TOTAL, "group" => "Parser").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 유닛 그룹 레이블 키
pub const LABEL_GROUP: &str = "group";

/// 제어 작업 레이블 키 (start, stop, restart, reload, force_run, enable, disable)
pub const LABEL_OPERATION: &str = "operation";

/// 결과 레이블 키 (ok, error)
pub const LABEL_RESULT: &str = "result";

// ─── 유닛 수명주기 ──────────────────────────────────────────────────

/// 성공한 워커 시작 횟수
pub const UNIT_STARTS_TOTAL: &str = "ironbot_unit_starts_total";

/// 워커 정지 횟수
pub const UNIT_STOPS_TOTAL: &str = "ironbot_unit_stops_total";

/// 예기치 않은 워커 종료 횟수
pub const UNIT_CRASHES_TOTAL: &str = "ironbot_unit_crashes_total";

/// 워커 실행 실패 횟수
pub const UNIT_LAUNCH_FAILURES_TOTAL: &str = "ironbot_unit_launch_failures_total";

/// 현재 Running 상태인 유닛 수
pub const UNITS_RUNNING: &str = "ironbot_units_running";

/// 주기 제한에 걸린 실행 요청 횟수
pub const RUNS_THROTTLED_TOTAL: &str = "ironbot_runs_throttled_total";

/// 정지 소요 시간 (SIGTERM부터 종료 확인까지)
pub const UNIT_STOP_DURATION_SECONDS: &str = "ironbot_unit_stop_duration_seconds";

/// 제어 작업 처리 횟수 (operation, result 레이블)
pub const CONTROL_OPERATIONS_TOTAL: &str = "ironbot_control_operations_total";

// ─── 토폴로지 해석 ──────────────────────────────────────────────────

/// 해석 시도 횟수
pub const RESOLUTIONS_TOTAL: &str = "ironbot_resolutions_total";

/// 해석 중 발견된 에러 수
pub const RESOLUTION_ERRORS_TOTAL: &str = "ironbot_resolution_errors_total";

/// 현재 계획에 포함된 유닛 수
pub const PLAN_UNITS: &str = "ironbot_plan_units";

// ─── 데몬 ──────────────────────────────────────────────────────────

/// 데몬 가동 시간 (초)
pub const DAEMON_UPTIME_SECONDS: &str = "ironbot_daemon_uptime_seconds";

/// 빌드 정보 (값은 항상 1, version 레이블)
pub const DAEMON_BUILD_INFO: &str = "ironbot_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 정지 소요 시간 히스토그램 버킷 (초)
///
/// 10ms ~ 60s 범위 (유예 시간 후 SIGKILL 포함)
pub const STOP_DURATION_BUCKETS: [f64; 9] = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0, 60.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `ironbot-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(UNIT_STARTS_TOTAL, "Total number of successful worker launches");
    describe_counter!(UNIT_STOPS_TOTAL, "Total number of worker stops");
    describe_counter!(
        UNIT_CRASHES_TOTAL,
        "Total number of workers found dead while expected to run"
    );
    describe_counter!(
        UNIT_LAUNCH_FAILURES_TOTAL,
        "Total number of failed worker launches"
    );
    describe_gauge!(UNITS_RUNNING, "Number of units currently running");
    describe_counter!(
        RUNS_THROTTLED_TOTAL,
        "Total number of run requests refused by the rate limit"
    );
    describe_histogram!(
        UNIT_STOP_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time from stop request to confirmed worker exit"
    );
    describe_counter!(
        CONTROL_OPERATIONS_TOTAL,
        "Total number of per-unit control operations by operation and result"
    );

    describe_counter!(RESOLUTIONS_TOTAL, "Total number of topology resolutions");
    describe_counter!(
        RESOLUTION_ERRORS_TOTAL,
        "Total number of topology resolution errors"
    );
    describe_gauge!(PLAN_UNITS, "Number of units in the active pipeline plan");

    describe_gauge!(DAEMON_UPTIME_SECONDS, "Ironbot daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Ironbot build information (constant 1, labelled by version)"
    );
}
