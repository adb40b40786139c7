//! 제어 작업 결과 타입
//!
//! 두 프런트엔드(CLI, HTTP)가 같은 구조를 렌더링합니다.

use ironbot_core::error::IronbotError;
use ironbot_core::unit::UnitId;
use ironbot_supervisor::{ReconcileSummary, UnitStatus};
use ironbot_topology::PlanDiff;
use serde::Serialize;

/// 유닛 하나에 대한 작업 실패
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeError {
    /// 안정적인 에러 분류 ([`IronbotError::kind`])
    pub kind: String,
    pub message: String,
}

impl From<&IronbotError> for OutcomeError {
    fn from(err: &IronbotError) -> Self {
        Self {
            kind: err.kind().to_owned(),
            message: err.to_string(),
        }
    }
}

/// 유닛별 결과: 성공이면 상태, 실패면 에러
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    Status(UnitStatus),
    Error(OutcomeError),
}

/// 일괄 작업 결과의 한 행
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitOutcome {
    pub unit_id: UnitId,
    #[serde(flatten)]
    pub result: OutcomeResult,
}

impl UnitOutcome {
    pub fn from_result(unit_id: UnitId, result: Result<UnitStatus, IronbotError>) -> Self {
        let result = match result {
            Ok(status) => OutcomeResult::Status(status),
            Err(e) => OutcomeResult::Error(OutcomeError::from(&e)),
        };
        Self { unit_id, result }
    }

    pub fn status(&self) -> Option<&UnitStatus> {
        match &self.result {
            OutcomeResult::Status(status) => Some(status),
            OutcomeResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&OutcomeError> {
        match &self.result {
            OutcomeResult::Status(_) => None,
            OutcomeResult::Error(e) => Some(e),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, OutcomeResult::Status(_))
    }
}

/// 대상에 포함된 모든 유닛의 결과 (유닛 ID 순)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub operation: String,
    pub target: String,
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }

    pub fn has_errors(&self) -> bool {
        self.failed() > 0
    }

    /// 일부만 실패했는지 (HTTP 207)
    pub fn is_partial(&self) -> bool {
        let failed = self.failed();
        failed > 0 && failed < self.outcomes.len()
    }
}

/// 해석(및 적용) 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveReport {
    pub fingerprint: String,
    pub units: usize,
    pub queues: usize,
    /// 현재 계획 대비 변경 내역
    pub diff: PlanDiff,
    /// `false`면 검사만 수행
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileSummary>,
}

/// 버전 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
}
