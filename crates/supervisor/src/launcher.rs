//! 워커 실행기: 프로세스 생성, 시그널 전달, 생존 확인
//!
//! 워커는 `<module> <unit-id>`로 실행되며, 해석된 설정은 환경변수로 전달됩니다.
//! [`WorkerLauncher`] trait 경계 덕분에 테스트에서는 실제 프로세스 대신
//! `testing::MockLauncher`를 사용할 수 있습니다.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, SecondsFormat, Utc};
use ironbot_core::BoxFuture;
use ironbot_core::error::{LaunchError, SignalError};
use ironbot_core::unit::UnitId;
use ironbot_topology::ResolvedUnit;
use serde_json::{Map, Value};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

// ─── 워커 환경변수 ───────────────────────────────────────────────────

pub const ENV_UNIT_ID: &str = "IRONBOT_UNIT_ID";
pub const ENV_GROUP: &str = "IRONBOT_GROUP";
/// 병합된 파라미터 (JSON 객체)
pub const ENV_PARAMETERS: &str = "IRONBOT_PARAMETERS";
pub const ENV_SOURCE_QUEUE: &str = "IRONBOT_SOURCE_QUEUE";
pub const ENV_INTERNAL_QUEUE: &str = "IRONBOT_INTERNAL_QUEUE";
/// 라우팅 키 → 큐 이름 (JSON 객체, `*`는 기본 목적지)
pub const ENV_DESTINATION_QUEUES: &str = "IRONBOT_DESTINATION_QUEUES";
pub const ENV_RATE_LIMIT_SECS: &str = "IRONBOT_RATE_LIMIT_SECS";
/// 이 시각(RFC 3339) 전에는 작업 루프를 돌리지 않음
pub const ENV_NOT_BEFORE: &str = "IRONBOT_NOT_BEFORE";

/// 워커에 보내는 시그널
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// 정상 종료 요청
    Term,
    /// 강제 종료
    Kill,
    /// 설정 재로드
    Hup,
    /// 주기 대기 중인 워커 깨우기
    Usr1,
}

impl Signal {
    #[cfg(unix)]
    fn as_raw(self) -> libc::c_int {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::Hup => libc::SIGHUP,
            Self::Usr1 => libc::SIGUSR1,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
            Self::Hup => "SIGHUP",
            Self::Usr1 => "SIGUSR1",
        };
        f.write_str(name)
    }
}

/// 워커 실행 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub unit_id: UnitId,
    pub module: String,
    /// 워커에 전달할 환경변수
    pub env: BTreeMap<String, String>,
}

impl LaunchRequest {
    /// 해석된 유닛으로부터 실행 요청을 만듭니다.
    pub fn for_unit(unit: &ResolvedUnit, not_before: Option<DateTime<Utc>>) -> Self {
        let destinations: Map<String, Value> = unit
            .destination_queues()
            .into_iter()
            .map(|(key, queue)| (key, Value::String(queue)))
            .collect();

        let mut env = BTreeMap::new();
        env.insert(ENV_UNIT_ID.to_owned(), unit.id.to_string());
        env.insert(ENV_GROUP.to_owned(), unit.group.clone());
        env.insert(
            ENV_PARAMETERS.to_owned(),
            Value::Object(unit.parameters.clone()).to_string(),
        );
        env.insert(ENV_SOURCE_QUEUE.to_owned(), unit.source_queue.clone());
        env.insert(ENV_INTERNAL_QUEUE.to_owned(), unit.internal_queue.clone());
        env.insert(
            ENV_DESTINATION_QUEUES.to_owned(),
            Value::Object(destinations).to_string(),
        );
        env.insert(ENV_RATE_LIMIT_SECS.to_owned(), unit.rate_limit.to_string());
        if let Some(at) = not_before {
            env.insert(
                ENV_NOT_BEFORE.to_owned(),
                at.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }

        Self {
            unit_id: unit.id.clone(),
            module: unit.module.clone(),
            env,
        }
    }

    pub fn not_before(&self) -> Option<&str> {
        self.env.get(ENV_NOT_BEFORE).map(String::as_str)
    }
}

/// 워커 종료 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub code: Option<i32>,
}

/// 워커 프로세스 식별 정보
///
/// pid는 재사용되므로 프로세스 시작 시각(epoch 초)을 함께 기록합니다.
/// 시작 시각을 모르는 레코드는 명령행의 유닛 ID 인자로 확인합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerProcess {
    pub pid: u32,
    pub start_time: Option<u64>,
}

/// 실행된 워커 핸들
#[derive(Debug)]
pub struct LaunchedWorker {
    pub process: WorkerProcess,
    /// 워커가 종료되면 한 번 수신됩니다.
    pub exit: oneshot::Receiver<ExitInfo>,
}

/// 워커 프로세스 실행/제어 경계
///
/// `signal`과 `is_alive`는 pid가 아직 그 유닛의 워커일 때만 프로세스를 건드립니다.
pub trait WorkerLauncher: Send + Sync {
    /// 워커를 실행합니다. 시작 직후 종료 여부 확인은 호출자의 몫입니다.
    fn launch(&self, request: LaunchRequest) -> BoxFuture<'_, Result<LaunchedWorker, LaunchError>>;

    /// 시그널을 보냅니다. 프로세스가 없거나 다른 프로세스가 pid를 물려받았으면 보내지 않고 성공입니다.
    fn signal(&self, unit: &UnitId, worker: WorkerProcess, signal: Signal) -> Result<(), SignalError>;

    /// 워커가 살아 있고 여전히 같은 프로세스인지
    fn is_alive(&self, unit: &UnitId, worker: WorkerProcess) -> bool;
}

// ─── ProcessLauncher ─────────────────────────────────────────────────

/// `tokio::process` 기반 실제 실행기
///
/// 워커는 자신의 프로세스 그룹에서 실행되어 터미널 시그널을 받지 않으며,
/// 종료 시그널은 그룹 전체로 전달됩니다.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    log_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    /// `log_dir`가 있으면 워커 stdout/stderr를 `<log_dir>/<unit-id>.log`에 추가합니다.
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self { log_dir }
    }

    fn output(&self, unit: &UnitId) -> Result<(Stdio, Stdio), LaunchError> {
        let Some(dir) = &self.log_dir else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        let spawn_err = |e: std::io::Error| LaunchError::Spawn {
            unit: unit.to_string(),
            reason: format!("cannot open log file in {}: {e}", dir.display()),
        };

        std::fs::create_dir_all(dir).map_err(spawn_err)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{unit}.log")))
            .map_err(spawn_err)?;
        let stderr = file.try_clone().map_err(spawn_err)?;
        Ok((Stdio::from(file), Stdio::from(stderr)))
    }

    async fn spawn_worker(&self, request: LaunchRequest) -> Result<LaunchedWorker, LaunchError> {
        let unit = request.unit_id.to_string();
        check_executable(&unit, &request.module)?;

        let (stdout, stderr) = self.output(&request.unit_id)?;

        let mut cmd = tokio::process::Command::new(&request.module);
        cmd.arg(request.unit_id.as_str())
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LaunchError::ExecutableNotFound {
                unit: unit.clone(),
                module: request.module.clone(),
            },
            std::io::ErrorKind::PermissionDenied => LaunchError::NotExecutable {
                unit: unit.clone(),
                module: request.module.clone(),
            },
            _ => LaunchError::Spawn {
                unit: unit.clone(),
                reason: e.to_string(),
            },
        })?;

        let Some(pid) = child.id() else {
            return Err(LaunchError::ExitedImmediately { unit, code: None });
        };
        let start_time = process_start_time(pid);
        if start_time.is_none() {
            warn!(unit_id = %request.unit_id, pid, "cannot read worker start time");
        }

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid, error = %e, "failed to wait for worker");
                    None
                }
            };
            // 수신자가 이미 사라졌어도 무시
            let _ = tx.send(ExitInfo { code });
        });

        info!(unit_id = %request.unit_id, pid, module = %request.module, "worker spawned");
        Ok(LaunchedWorker {
            process: WorkerProcess { pid, start_time },
            exit: rx,
        })
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, request: LaunchRequest) -> BoxFuture<'_, Result<LaunchedWorker, LaunchError>> {
        Box::pin(self.spawn_worker(request))
    }

    fn signal(&self, unit: &UnitId, worker: WorkerProcess, signal: Signal) -> Result<(), SignalError> {
        if !owns_process(unit, worker) {
            debug!(unit_id = %unit, pid = worker.pid, %signal, "pid is not the unit's worker, signal skipped");
            return Ok(());
        }
        send_signal(unit, worker.pid, signal)
    }

    fn is_alive(&self, unit: &UnitId, worker: WorkerProcess) -> bool {
        owns_process(unit, worker)
    }
}

/// 경로로 지정된 모듈의 존재와 실행 권한을 미리 확인합니다.
///
/// 경로 구분자가 없는 이름은 `PATH` 검색에 맡깁니다.
fn check_executable(unit: &str, module: &str) -> Result<(), LaunchError> {
    if !module.contains('/') {
        return Ok(());
    }
    let path = Path::new(module);
    let metadata = std::fs::metadata(path).map_err(|_| LaunchError::ExecutableNotFound {
        unit: unit.to_owned(),
        module: module.to_owned(),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
            return Err(LaunchError::NotExecutable {
                unit: unit.to_owned(),
                module: module.to_owned(),
            });
        }
    }
    #[cfg(not(unix))]
    {
        if !metadata.is_file() {
            return Err(LaunchError::NotExecutable {
                unit: unit.to_owned(),
                module: module.to_owned(),
            });
        }
    }
    Ok(())
}

#[cfg(unix)]
fn send_signal(unit: &UnitId, pid: u32, signal: Signal) -> Result<(), SignalError> {
    use std::io::ErrorKind;

    let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
        return Err(SignalError::Failed {
            unit: unit.to_string(),
            pid,
            signal: signal.to_string(),
            reason: "pid out of range".to_owned(),
        });
    };

    // 프로세스 그룹 우선, 그룹이 없으면(다른 경로로 시작된 pid) 단일 프로세스
    // SAFETY: kill(2)은 메모리 안전성에 영향을 주지 않습니다.
    let mut result = unsafe { libc::kill(-raw_pid, signal.as_raw()) };
    if result != 0 {
        // SAFETY: 위와 동일
        result = unsafe { libc::kill(raw_pid, signal.as_raw()) };
    }
    if result == 0 {
        debug!(unit_id = %unit, pid, %signal, "signal delivered");
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!(unit_id = %unit, pid, %signal, "process already gone");
        return Ok(());
    }
    match err.kind() {
        ErrorKind::PermissionDenied => Err(SignalError::PermissionDenied {
            unit: unit.to_string(),
            pid,
            signal: signal.to_string(),
        }),
        _ => Err(SignalError::Failed {
            unit: unit.to_string(),
            pid,
            signal: signal.to_string(),
            reason: err.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn send_signal(unit: &UnitId, pid: u32, signal: Signal) -> Result<(), SignalError> {
    Err(SignalError::Failed {
        unit: unit.to_string(),
        pid,
        signal: signal.to_string(),
        reason: "signals not supported on this platform".to_owned(),
    })
}

/// 기록된 시작 시각과 실제 시작 시각의 허용 오차 (초 단위 반올림 차이)
const START_TIME_TOLERANCE_SECS: u64 = 1;

struct ProcessSnapshot {
    start_time: u64,
    args: Vec<String>,
}

/// 한 프로세스의 정보만 새로 읽습니다. 없거나 좀비면 `None`
fn inspect_process(pid: u32) -> Option<ProcessSnapshot> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );
    let process = system.process(pid)?;
    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        return None;
    }
    Some(ProcessSnapshot {
        start_time: process.start_time(),
        args: process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect(),
    })
}

/// 프로세스 시작 시각 (epoch 초). 프로세스가 없으면 `None`
pub fn process_start_time(pid: u32) -> Option<u64> {
    inspect_process(pid).map(|process| process.start_time)
}

/// `worker`가 살아 있고 여전히 이 유닛의 워커인지 확인합니다.
///
/// 시작 시각이 기록되어 있으면 그것을 비교하고, 없으면 `<module> <unit-id>` 명령행에
/// 유닛 ID 인자가 있는지 봅니다.
pub fn owns_process(unit: &UnitId, worker: WorkerProcess) -> bool {
    let Some(process) = inspect_process(worker.pid) else {
        return false;
    };
    match worker.start_time {
        Some(expected) => process.start_time.abs_diff(expected) <= START_TIME_TOLERANCE_SECS,
        None => process.args.iter().skip(1).any(|arg| arg == unit.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironbot_topology::Edge;

    fn resolved() -> ResolvedUnit {
        let id = UnitId::from("geo-expert");
        let mut parameters = Map::new();
        parameters.insert("database".to_owned(), Value::from("/var/lib/geo.mmdb"));
        ResolvedUnit {
            source_queue: id.source_queue(),
            internal_queue: id.internal_queue(),
            id,
            group: "Expert".to_owned(),
            module: "/usr/bin/geo".to_owned(),
            description: None,
            enabled: true,
            parameters,
            rate_limit: 30,
            edges: vec![Edge {
                routing_key: "*".to_owned(),
                target: UnitId::from("out"),
                queue: "out-queue".to_owned(),
            }],
        }
    }

    #[test]
    fn request_env_carries_resolved_unit() {
        let request = LaunchRequest::for_unit(&resolved(), None);

        assert_eq!(request.env[ENV_UNIT_ID], "geo-expert");
        assert_eq!(request.env[ENV_SOURCE_QUEUE], "geo-expert-queue");
        assert_eq!(request.env[ENV_INTERNAL_QUEUE], "geo-expert-queue-internal");
        assert_eq!(request.env[ENV_DESTINATION_QUEUES], r#"{"*":"out-queue"}"#);
        assert_eq!(
            request.env[ENV_PARAMETERS],
            r#"{"database":"/var/lib/geo.mmdb"}"#
        );
        assert_eq!(request.env[ENV_RATE_LIMIT_SECS], "30");
        assert!(request.not_before().is_none());
    }

    #[test]
    fn request_env_carries_not_before() {
        let at = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        let request = LaunchRequest::for_unit(&resolved(), Some(at));
        assert_eq!(request.not_before(), Some("2027-01-15T08:00:00Z"));
    }

    #[test]
    fn missing_path_module_is_not_found() {
        let err = check_executable("u", "/nonexistent/ironbot/worker").unwrap_err();
        assert!(matches!(err, LaunchError::ExecutableNotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.sh");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();

        let err = check_executable("u", path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, LaunchError::NotExecutable { .. }));
    }

    #[test]
    fn current_process_identity_is_recognized() {
        let pid = std::process::id();
        let start_time = process_start_time(pid).expect("own process is visible");
        let unit = UnitId::from("self");

        assert!(owns_process(&unit, WorkerProcess { pid, start_time: Some(start_time) }));
        assert!(!owns_process(
            &unit,
            WorkerProcess {
                pid,
                start_time: Some(start_time.saturating_sub(3600)),
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn unrelated_process_is_not_a_worker() {
        // 유닛 ID를 인자로 받지 않은 프로세스
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let unit = UnitId::from("feed");

        let legacy = WorkerProcess { pid, start_time: None };
        assert!(!owns_process(&unit, legacy));
        assert!(ProcessLauncher::default().signal(&unit, legacy, Signal::Term).is_ok());
        assert!(child.try_wait().unwrap().is_none(), "unrelated process must survive");

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn worker_without_start_time_is_matched_by_argv() {
        let mut child = std::process::Command::new("/bin/sh")
            .args(["-c", "sleep 30; true", "feed"])
            .spawn()
            .unwrap();
        let worker = WorkerProcess {
            pid: child.id(),
            start_time: None,
        };

        assert!(owns_process(&UnitId::from("feed"), worker));
        assert!(!owns_process(&UnitId::from("parser"), worker));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn signal_to_missing_process_is_success() {
        // pid_max 이상의 pid는 존재할 수 없음
        let result = send_signal(&UnitId::from("ghost"), 4_194_304 + 1000, Signal::Term);
        assert!(result.is_ok());
    }
}
