//! ironbot-core: 파이프라인 구성 모델, 기본값 병합, 공통 에러와 설정
//!
//! 다른 모든 ironbot 크레이트가 의존하는 기반 크레이트입니다.
//!
//! - [`unit`]: 유닛 선언과 파이프라인 구성 문서
//! - [`defaults`]: 전역/그룹 기본값 계층과 병합
//! - [`config`]: 데몬/CLI 런타임 설정 (`ironbot.toml`)
//! - [`error`]: 도메인별 에러 타입
//! - [`metrics`]: Prometheus 메트릭 이름 상수

pub mod config;
pub mod defaults;
pub mod error;
pub mod metrics;
pub mod unit;

use std::future::Future;
use std::pin::Pin;

/// trait 객체에서 async 메서드를 반환하기 위한 박스 퓨처
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    ConfigError, IronbotError, LaunchError, ResolutionError, SignalError, StateError, StoreError,
};

// 설정
pub use config::IronbotConfig;

// 구성 모델
pub use defaults::{DefaultsLayer, EffectiveUnitConfig, LayerOverrides, merge};
pub use unit::{Destinations, PipelineConfig, UnitId, UnitSpec};
