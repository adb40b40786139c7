//! ironbot-supervisor: 워커 프로세스 감독
//!
//! 유닛마다 최대 하나의 워커 프로세스를 띄우고, 수명주기 상태와 실행 주기 기록을
//! 저장소에 영속하여 감독자 재시작 후에도 이어서 관리합니다.
//!
//! # 구성 요소
//!
//! - [`Supervisor`]: 유닛별 상태 머신 (start/stop/restart/reload/force_run/enable/disable)
//! - [`StatusStore`]: 레코드 저장소 ([`FileStatusStore`], [`MemoryStatusStore`])
//! - [`WorkerLauncher`]: 프로세스 실행과 신호 전달 ([`ProcessLauncher`])
//! - [`cadence`]: `rate_limit` 기반 실행 허가 판정

pub mod cadence;
pub mod launcher;
pub mod state;
pub mod store;
pub mod supervisor;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// 상태
pub use state::{ProcessState, UnitRecord, UnitStatus};

// 주기 제한
pub use cadence::RunDecision;

// 실행기
pub use launcher::{
    ExitInfo, LaunchRequest, LaunchedWorker, ProcessLauncher, Signal, WorkerLauncher, WorkerProcess,
};

// 저장소
pub use store::{FileStatusStore, MemoryStatusStore, StatusStore, StoreLock};

// 감독자
pub use supervisor::{ReconcileSummary, Supervisor, SupervisorOptions};
