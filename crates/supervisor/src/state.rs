//! 유닛 상태: 프로세스 상태, 영속 레코드, 조회 뷰

use std::fmt;

use chrono::{DateTime, Utc};
use ironbot_core::unit::UnitId;
use serde::{Deserialize, Serialize};

use crate::launcher::WorkerProcess;

/// 유닛 프로세스 상태
///
/// 상태 전환:
/// - `Stopped`/`Crashed` → `start()` → `Starting` → `Running`
/// - `Running` → `stop()` → `Stopping` → `Stopped`
/// - `Running` → 예기치 않은 종료 → `Crashed`
/// - 모든 상태 → `disable()` → `Disabled` → `enable()` → `Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
    Disabled,
}

impl ProcessState {
    /// 워커 프로세스가 살아 있어야 하는 상태인지
    pub fn expects_process(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
            Self::Disabled => "disabled",
        };
        f.pad(name)
    }
}

/// 상태 저장소에 영속되는 유닛 레코드
///
/// 첫 시작(또는 비활성 유닛의 첫 조정) 시 생성되고, 명시적으로 유닛을 제거할 때만 삭제됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub unit_id: UnitId,
    pub state: ProcessState,
    #[serde(default)]
    pub pid: Option<u32>,
    /// 워커 프로세스 시작 시각 (epoch 초). 재사용된 pid를 구분합니다.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_start_time: Option<u64>,
    /// 마지막으로 작업 루프 실행이 허가된 시각
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_forced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_exit_code: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl UnitRecord {
    pub fn new(unit_id: UnitId, state: ProcessState) -> Self {
        Self {
            unit_id,
            state,
            pid: None,
            pid_start_time: None,
            last_run_at: None,
            last_forced_at: None,
            started_at: None,
            last_exit_code: None,
            updated_at: Utc::now(),
        }
    }

    /// 기록된 워커 프로세스
    pub fn worker(&self) -> Option<WorkerProcess> {
        self.pid.map(|pid| WorkerProcess {
            pid,
            start_time: self.pid_start_time,
        })
    }

    pub(crate) fn attach(&mut self, process: WorkerProcess) {
        self.pid = Some(process.pid);
        self.pid_start_time = process.start_time;
    }

    pub(crate) fn transition(&mut self, state: ProcessState) {
        self.state = state;
        if !state.expects_process() {
            self.pid = None;
            self.pid_start_time = None;
        }
        self.updated_at = Utc::now();
    }
}

/// 상태 조회 결과. 레코드에 실시간 생존 여부를 더한 뷰입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub unit_id: UnitId,
    pub state: ProcessState,
    pub pid: Option<u32>,
    /// 프로세스 생존 여부. pid가 없으면 `None`
    pub alive: Option<bool>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_forced_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl UnitStatus {
    pub(crate) fn from_record(record: &UnitRecord, alive: Option<bool>) -> Self {
        Self {
            unit_id: record.unit_id.clone(),
            state: record.state,
            pid: record.pid,
            alive,
            last_run_at: record.last_run_at,
            last_forced_at: record.last_forced_at,
            started_at: record.started_at,
            last_exit_code: record.last_exit_code,
            updated_at: record.updated_at,
        }
    }
}
