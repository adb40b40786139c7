//! 테스트 지원: 실제 프로세스 없이 동작하는 실행기
//!
//! `test-util` 기능 또는 이 크레이트의 테스트에서만 컴파일됩니다.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ironbot_core::BoxFuture;
use ironbot_core::error::{LaunchError, SignalError};
use ironbot_core::unit::UnitId;
use tokio::sync::oneshot;

use crate::launcher::{
    ExitInfo, LaunchRequest, LaunchedWorker, Signal, WorkerLauncher, WorkerProcess,
};

/// 가짜 프로세스 시작 시각의 기준값 (epoch 초)
const BOOT_TIME: u64 = 1_700_000_000;

struct MockProcess {
    start_time: u64,
    /// 워커면 유닛 ID, 무관한 프로세스면 `None`
    unit: Option<UnitId>,
}

#[derive(Default)]
struct MockState {
    alive: BTreeMap<u32, MockProcess>,
    exits: BTreeMap<u32, oneshot::Sender<ExitInfo>>,
    launches: Vec<LaunchRequest>,
    signals: Vec<(u32, Signal)>,
    missing_modules: BTreeSet<String>,
    dying_modules: BTreeSet<String>,
    stubborn: bool,
}

/// 메모리 안에서 워커를 흉내 내는 실행기
///
/// - `SIGTERM`/`SIGKILL`은 워커를 즉시 종료시킵니다 (`ignore_sigterm` 설정 시 `SIGTERM` 무시).
/// - `SIGHUP`/`SIGUSR1`은 기록만 합니다.
/// - [`crash`](Self::crash)로 예기치 않은 종료를 만들 수 있습니다.
/// - 실제 실행기처럼 식별 정보가 맞지 않는 pid에는 시그널을 보내지 않고 기록도 남기지 않습니다.
pub struct MockLauncher {
    state: Mutex<MockState>,
    next_pid: AtomicU32,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    pub fn new() -> Self {
        Self {
            state: Mutex::default(),
            next_pid: AtomicU32::new(10_000),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 이 모듈은 실행 파일이 없는 것으로 처리합니다.
    pub fn fail_module(&self, module: &str) {
        self.state().missing_modules.insert(module.to_owned());
    }

    /// 이 모듈은 시작 직후 종료합니다.
    pub fn exit_immediately(&self, module: &str) {
        self.state().dying_modules.insert(module.to_owned());
    }

    /// `SIGTERM`을 무시하여 `SIGKILL` 승격을 유도합니다.
    pub fn ignore_sigterm(&self, stubborn: bool) {
        self.state().stubborn = stubborn;
    }

    /// 워커가 스스로 죽은 것처럼 종료시킵니다.
    pub fn crash(&self, pid: u32, code: i32) {
        let mut state = self.state();
        state.alive.remove(&pid);
        if let Some(tx) = state.exits.remove(&pid) {
            let _ = tx.send(ExitInfo { code: Some(code) });
        }
    }

    /// 워커가 알림 없이 사라지고 무관한 프로세스가 같은 pid를 물려받습니다.
    pub fn reuse_pid(&self, pid: u32) {
        let mut state = self.state();
        state.exits.remove(&pid);
        let start_time = BOOT_TIME + u64::from(self.next_pid.fetch_add(1, Ordering::SeqCst));
        state.alive.insert(
            pid,
            MockProcess {
                start_time,
                unit: None,
            },
        );
    }

    /// 워커가 아닌 살아 있는 프로세스를 만들어 pid를 돌려줍니다.
    pub fn foreign_process(&self) -> u32 {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.state().alive.insert(
            pid,
            MockProcess {
                start_time: BOOT_TIME + u64::from(pid),
                unit: None,
            },
        );
        pid
    }

    /// pid를 가진 프로세스가 (워커든 아니든) 살아 있는지
    pub fn is_running(&self, pid: u32) -> bool {
        self.state().alive.contains_key(&pid)
    }

    /// 워커 종료를 알리지 않고 사라지게 합니다 (다른 프로세스가 띄운 워커의 사망).
    pub fn vanish(&self, pid: u32) {
        let mut state = self.state();
        state.alive.remove(&pid);
        state.exits.remove(&pid);
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.state().launches.clone()
    }

    pub fn signals(&self) -> Vec<(u32, Signal)> {
        self.state().signals.clone()
    }

    /// 살아 있는 워커 수. 무관한 프로세스는 세지 않습니다.
    pub fn alive_count(&self) -> usize {
        self.state()
            .alive
            .values()
            .filter(|process| process.unit.is_some())
            .count()
    }

    fn owns(state: &MockState, unit: &UnitId, worker: WorkerProcess) -> bool {
        state.alive.get(&worker.pid).is_some_and(|process| match worker.start_time {
            Some(start_time) => process.start_time == start_time,
            None => process.unit.as_ref() == Some(unit),
        })
    }

    fn terminate(state: &mut MockState, pid: u32) {
        state.alive.remove(&pid);
        if let Some(tx) = state.exits.remove(&pid) {
            let _ = tx.send(ExitInfo::default());
        }
    }
}

impl WorkerLauncher for MockLauncher {
    fn launch(&self, request: LaunchRequest) -> BoxFuture<'_, Result<LaunchedWorker, LaunchError>> {
        Box::pin(async move {
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            let mut state = self.state();
            let module = request.module.clone();
            let unit_id = request.unit_id.clone();
            let unit = unit_id.to_string();
            state.launches.push(request);

            if state.missing_modules.contains(&module) {
                return Err(LaunchError::ExecutableNotFound { unit, module });
            }
            let start_time = BOOT_TIME + u64::from(pid);
            if state.dying_modules.contains(&module) {
                let _ = tx.send(ExitInfo { code: Some(1) });
            } else {
                state.alive.insert(
                    pid,
                    MockProcess {
                        start_time,
                        unit: Some(unit_id),
                    },
                );
                state.exits.insert(pid, tx);
            }
            Ok(LaunchedWorker {
                process: WorkerProcess {
                    pid,
                    start_time: Some(start_time),
                },
                exit: rx,
            })
        })
    }

    fn signal(&self, unit: &UnitId, worker: WorkerProcess, signal: Signal) -> Result<(), SignalError> {
        let mut state = self.state();
        if !Self::owns(&state, unit, worker) {
            return Ok(());
        }
        let pid = worker.pid;
        state.signals.push((pid, signal));
        match signal {
            Signal::Kill => Self::terminate(&mut state, pid),
            Signal::Term if !state.stubborn => Self::terminate(&mut state, pid),
            _ => {}
        }
        Ok(())
    }

    fn is_alive(&self, unit: &UnitId, worker: WorkerProcess) -> bool {
        Self::owns(&self.state(), unit, worker)
    }
}
