//! ironbot-control: 관리 파사드
//!
//! [`Controller`]는 구성 문서, 해석된 계획, 감독자를 묶어 CLI와 HTTP 서버가 함께 쓰는
//! 하나의 작업 집합을 제공합니다. 대상(`all`, 그룹, 유닛 ID)에 대한 작업은 유닛별 결과를 담은
//! [`BatchReport`]로 돌아옵니다.

pub mod controller;
pub mod report;

pub use controller::{Controller, Operation};
pub use report::{BatchReport, OutcomeError, OutcomeResult, ResolveReport, UnitOutcome, VersionInfo};

// 프런트엔드가 자주 쓰는 타입
pub use ironbot_topology::{QueueKind, Target};
