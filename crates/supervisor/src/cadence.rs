//! 실행 주기 제한: 영속된 `last_run_at` 기반의 실행 허가 판정
//!
//! 주기 제한은 시작 거부가 아니라 작업 루프의 게이트입니다.
//! 워커는 매 반복 전에 판정을 요청하고, `Throttled`면 `until`까지 대기합니다.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// 실행 허가 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RunDecision {
    /// 실행 허가. `last_run_at`이 지금으로 기록됨
    Proceed,
    /// 주기 제한에 걸림
    Throttled { until: DateTime<Utc> },
}

impl RunDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// 다음 실행이 허용되는 시각. 기록이 없거나 제한이 0이면 `None`
pub fn next_run_at(last_run_at: Option<DateTime<Utc>>, rate_limit_secs: u64) -> Option<DateTime<Utc>> {
    if rate_limit_secs == 0 {
        return None;
    }
    let last = last_run_at?;
    let secs = i64::try_from(rate_limit_secs).unwrap_or(i64::MAX);
    let delta = TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX);
    Some(last.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
}

/// `now` 기준으로 아직 도래하지 않은 다음 실행 시각
///
/// 워커 시작 시 `IRONBOT_NOT_BEFORE`로 전달됩니다.
pub fn not_before(
    last_run_at: Option<DateTime<Utc>>,
    rate_limit_secs: u64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    next_run_at(last_run_at, rate_limit_secs).filter(|at| *at > now)
}

/// 실행 허가 판정
pub fn decide(last_run_at: Option<DateTime<Utc>>, rate_limit_secs: u64, now: DateTime<Utc>) -> RunDecision {
    match not_before(last_run_at, rate_limit_secs, now) {
        Some(until) => RunDecision::Throttled { until },
        None => RunDecision::Proceed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn never_run_proceeds() {
        assert_eq!(decide(None, 60, at(0)), RunDecision::Proceed);
    }

    #[test]
    fn zero_limit_always_proceeds() {
        assert_eq!(decide(Some(at(0)), 0, at(0)), RunDecision::Proceed);
    }

    #[test]
    fn within_interval_is_throttled() {
        assert_eq!(
            decide(Some(at(0)), 60, at(59)),
            RunDecision::Throttled { until: at(60) }
        );
    }

    #[test]
    fn interval_boundary_proceeds() {
        assert!(decide(Some(at(0)), 60, at(60)).is_proceed());
        assert!(decide(Some(at(0)), 60, at(61)).is_proceed());
    }

    #[test]
    fn huge_limit_saturates_instead_of_panicking() {
        let decision = decide(Some(at(0)), u64::MAX, at(1));
        assert!(matches!(decision, RunDecision::Throttled { .. }));
    }

    #[test]
    fn not_before_is_none_when_elapsed() {
        assert_eq!(not_before(Some(at(0)), 10, at(30)), None);
        assert_eq!(not_before(Some(at(0)), 10, at(5)), Some(at(10)));
    }
}
