//! ironbot-topology: 파이프라인 토폴로지 해석기
//!
//! 평면적인 유닛 선언([`PipelineConfig`](ironbot_core::unit::PipelineConfig))을
//! 큐 이름과 연결이 모두 결정된 불변 [`PipelinePlan`]으로 변환합니다.
//!
//! # 아키텍처
//!
//! ```text
//! PipelineConfig -> merge defaults -> resolve destinations -> validate graph -> PipelinePlan
//!                                                                 |
//!                                               dangling / cycles / unreachable
//! ```
//!
//! 큐 백엔드는 외부 협력자입니다. 이 크레이트는 이름과 연결만 계산합니다.

pub mod plan;
pub mod resolver;

pub use plan::{Edge, PipelinePlan, PlanDiff, QueueKind, ResolvedUnit, Target};
pub use resolver::resolve;
