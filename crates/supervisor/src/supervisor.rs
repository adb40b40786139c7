//! 프로세스 감독자: 유닛별 수명주기 상태 머신
//!
//! 모든 작업은 모든 상태에서 정의됩니다. 적용되지 않는 작업은 현재 상태를 그대로 돌려주는
//! no-op이며, 비활성 유닛에 대한 `force_run`만 [`StateError`]입니다.
//!
//! | 작업 | Stopped | Crashed | Starting/Running | Disabled |
//! |---|---|---|---|---|
//! | start | 실행 → Running | 실행 → Running | no-op | no-op |
//! | stop | no-op | → Stopped | SIGTERM, 유예, SIGKILL → Stopped | no-op |
//! | restart | stop + start | stop + start | stop + start | no-op |
//! | reload | no-op | no-op | SIGHUP | no-op |
//! | force_run | 기록 초기화 후 start | 기록 초기화 후 start | 기록 초기화, SIGUSR1 | 에러 |
//! | enable | no-op | no-op | no-op | → Stopped |
//! | disable | → Disabled | → Disabled | stop 후 → Disabled | no-op |
//!
//! 변경 작업은 유닛별 잠금으로 직렬화됩니다. 잠금은 감독자 내부 뮤텍스와 저장소 잠금 두 겹이라
//! 같은 상태 디렉토리를 쓰는 다른 프로세스의 작업과도 겹치지 않습니다. `status`는 잠금을 기다리지 않습니다.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ironbot_core::config::SupervisorConfig;
use ironbot_core::error::{IronbotError, LaunchError, SignalError, StateError, StoreError};
use ironbot_core::metrics as m;
use ironbot_core::unit::UnitId;
use ironbot_topology::PipelinePlan;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cadence::{self, RunDecision};
use crate::launcher::{
    ExitInfo, LaunchRequest, LaunchedWorker, Signal, WorkerLauncher, WorkerProcess,
};
use crate::state::{ProcessState, UnitRecord, UnitStatus};
use crate::store::{StatusStore, StoreLock};

/// 감독자 동작 옵션
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// SIGTERM 후 SIGKILL까지 유예 시간
    pub stop_grace: Duration,
    /// 시작 직후 종료를 감지하는 대기 시간
    pub startup_probe: Duration,
    /// SIGKILL 후 종료 확인 대기 시간
    pub kill_timeout: Duration,
    /// 종료 대기 중 생존 확인 간격
    pub poll_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(2),
            startup_probe: Duration::from_millis(200),
            kill_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl From<&SupervisorConfig> for SupervisorOptions {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            stop_grace: config.stop_grace(),
            startup_probe: config.startup_probe(),
            ..Self::default()
        }
    }
}

/// 조정(reconcile) 결과 요약
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// 살아 있는 워커를 그대로 이어받은 유닛 수
    pub adopted: usize,
    /// 죽은 워커가 발견되어 Crashed/Stopped로 정정된 유닛 수
    pub corrected: usize,
    /// 비활성 레코드를 새로 만든 유닛 수
    pub seeded_disabled: usize,
    /// 계획에서 빠져 워커를 정지하고 레코드를 지운 유닛 수
    pub retired: usize,
    /// 저장소 에러로 건너뛴 유닛 수
    pub failed: usize,
}

/// 워커 프로세스 감독자
///
/// 복제 비용이 낮으며(`Arc` 공유), 종료 감시 태스크도 같은 상태를 공유합니다.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn StatusStore>,
    launcher: Arc<dyn WorkerLauncher>,
    options: SupervisorOptions,
    plan: RwLock<Arc<PipelinePlan>>,
    /// 마지막으로 관찰한 레코드
    records: RwLock<BTreeMap<UnitId, UnitRecord>>,
    locks: Mutex<BTreeMap<UnitId, Arc<Mutex<()>>>>,
}

/// 유닛 잠금 보유 핸들
struct UnitGuard {
    _store: StoreLock,
    _local: OwnedMutexGuard<()>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn StatusStore>,
        launcher: Arc<dyn WorkerLauncher>,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                launcher,
                options,
                plan: RwLock::new(Arc::new(PipelinePlan::empty())),
                records: RwLock::new(BTreeMap::new()),
                locks: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// 현재 계획
    pub async fn plan(&self) -> Arc<PipelinePlan> {
        self.inner.plan.read().await.clone()
    }

    /// 계획을 교체합니다. 기존 워커에는 영향을 주지 않습니다.
    pub async fn set_plan(&self, plan: Arc<PipelinePlan>) {
        gauge!(m::PLAN_UNITS).set(plan.len() as f64);
        *self.inner.plan.write().await = plan;
    }

    /// 계획을 교체하고 저장소의 레코드를 실제 프로세스 상태와 맞춥니다.
    ///
    /// - 살아 있는 pid는 그대로 이어받음
    /// - 죽은 `Running`/`Starting`은 `Crashed`, 죽은 `Stopping`은 `Stopped`
    /// - 레코드가 없고 `enabled = false`인 유닛은 `Disabled` 레코드 생성
    /// - 계획에 없는 유닛의 레코드는 워커를 정지한 뒤 삭제
    pub async fn reconcile(&self, plan: Arc<PipelinePlan>) -> ReconcileSummary {
        self.set_plan(plan.clone()).await;

        let mut summary = ReconcileSummary::default();
        for unit in plan.units() {
            let outcome = async {
                let _guard = self.lock_unit(&unit.id).await?;
                match self.load_record(&unit.id).await? {
                    None if !unit.enabled => {
                        let record = UnitRecord::new(unit.id.clone(), ProcessState::Disabled);
                        self.save_record(&record).await?;
                        summary.seeded_disabled += 1;
                    }
                    None => {}
                    Some(mut record) => {
                        if self.refresh_liveness(&mut record).await? {
                            summary.corrected += 1;
                        } else if record.state.expects_process() {
                            summary.adopted += 1;
                        }
                    }
                }
                Ok::<(), StoreError>(())
            }
            .await;

            if let Err(e) = outcome {
                warn!(unit_id = %unit.id, error = %e, "reconcile failed for unit");
                summary.failed += 1;
            }
        }
        self.retire_unplanned(&plan, &mut summary).await;

        self.publish_running_gauge().await;
        info!(
            units = plan.len(),
            adopted = summary.adopted,
            corrected = summary.corrected,
            seeded_disabled = summary.seeded_disabled,
            retired = summary.retired,
            failed = summary.failed,
            "supervisor reconciled"
        );
        summary
    }

    /// 계획에 없는 유닛 레코드를 정리합니다. 상태 디렉토리는 하나의 파이프라인 문서만 소유합니다.
    async fn retire_unplanned(&self, plan: &PipelinePlan, summary: &mut ReconcileSummary) {
        let records = match self.inner.store.list().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "cannot list unit records, stale units kept");
                summary.failed += 1;
                return;
            }
        };

        for record in records {
            let id = record.unit_id;
            if plan.unit(id.as_str()).is_some() {
                continue;
            }
            match self.remove(&id).await {
                Ok(()) => {
                    info!(unit_id = %id, "unit no longer in pipeline, retired");
                    summary.retired += 1;
                }
                Err(e) => {
                    warn!(unit_id = %id, error = %e, "failed to retire unit");
                    summary.failed += 1;
                }
            }
        }
    }

    // ─── 제어 작업 ──────────────────────────────────────────────────

    /// 유닛을 시작합니다.
    ///
    /// 주기 제한 안이면 워커는 `IRONBOT_NOT_BEFORE`를 받고 스스로 대기합니다.
    pub async fn start(&self, id: &UnitId) -> Result<UnitStatus, IronbotError> {
        let _guard = self.lock_unit(id).await?;
        let mut record = self.locked_record(id).await?;
        self.start_locked(&mut record).await
    }

    /// 유닛을 정지합니다. 유예 시간이 지나면 강제 종료하며 항상 `Stopped`로 끝납니다.
    pub async fn stop(&self, id: &UnitId) -> Result<UnitStatus, IronbotError> {
        let _guard = self.lock_unit(id).await?;
        let mut record = self.locked_record(id).await?;
        self.stop_locked(&mut record).await
    }

    /// 한 번의 잠금 안에서 정지 후 시작합니다.
    pub async fn restart(&self, id: &UnitId) -> Result<UnitStatus, IronbotError> {
        let _guard = self.lock_unit(id).await?;
        let mut record = self.locked_record(id).await?;
        if record.state == ProcessState::Disabled {
            return Ok(self.view(&record));
        }
        self.stop_locked(&mut record).await?;
        self.start_locked(&mut record).await
    }

    /// 실행 중인 워커에 SIGHUP을 보냅니다.
    pub async fn reload(&self, id: &UnitId) -> Result<UnitStatus, IronbotError> {
        let _guard = self.lock_unit(id).await?;
        let record = self.locked_record(id).await?;

        if matches!(record.state, ProcessState::Starting | ProcessState::Running) {
            if let Some(worker) = record.worker() {
                self.inner.launcher.signal(id, worker, Signal::Hup)?;
                info!(unit_id = %id, pid = worker.pid, "reload requested");
            }
        }
        Ok(self.view(&record))
    }

    /// 주기 제한 기록을 지워 다음 판정이 반드시 통과하게 합니다.
    ///
    /// 정지 상태면 시작하고, 실행 중이면 SIGUSR1로 깨웁니다.
    pub async fn force_run(&self, id: &UnitId) -> Result<UnitStatus, IronbotError> {
        let _guard = self.lock_unit(id).await?;
        let mut record = self.locked_record(id).await?;

        if record.state == ProcessState::Disabled {
            return Err(StateError::Disabled {
                unit: id.to_string(),
                operation: "force_run".to_owned(),
            }
            .into());
        }

        let now = Utc::now();
        record.last_run_at = None;
        record.last_forced_at = Some(now);
        record.updated_at = now;
        self.save_record(&record).await?;
        info!(unit_id = %id, "run cadence reset");

        match record.state {
            ProcessState::Stopped | ProcessState::Crashed => self.start_locked(&mut record).await,
            ProcessState::Starting | ProcessState::Running => {
                if let Some(worker) = record.worker() {
                    self.inner.launcher.signal(id, worker, Signal::Usr1)?;
                }
                Ok(self.view(&record))
            }
            ProcessState::Stopping | ProcessState::Disabled => Ok(self.view(&record)),
        }
    }

    /// `Disabled` 유닛을 `Stopped`로 되돌립니다.
    pub async fn enable(&self, id: &UnitId) -> Result<UnitStatus, IronbotError> {
        let _guard = self.lock_unit(id).await?;
        let mut record = self.locked_record(id).await?;

        if record.state == ProcessState::Disabled {
            record.transition(ProcessState::Stopped);
            self.save_record(&record).await?;
            info!(unit_id = %id, "unit enabled");
        }
        Ok(self.view(&record))
    }

    /// 유닛을 (필요하면 정지한 뒤) `Disabled`로 만듭니다.
    pub async fn disable(&self, id: &UnitId) -> Result<UnitStatus, IronbotError> {
        let _guard = self.lock_unit(id).await?;
        let mut record = self.locked_record(id).await?;

        if record.state == ProcessState::Disabled {
            return Ok(self.view(&record));
        }
        self.stop_locked(&mut record).await?;
        record.transition(ProcessState::Disabled);
        self.save_record(&record).await?;
        info!(unit_id = %id, "unit disabled");
        Ok(self.view(&record))
    }

    /// 마지막 레코드에 실시간 생존 여부를 더해 반환합니다.
    ///
    /// 유닛 잠금을 기다리지 않습니다. 기록상 실행 중인데 프로세스가 없으면 `Crashed`로 보고하고,
    /// 잠금이 비어 있을 때만 그 결과를 저장합니다.
    pub async fn status(&self, id: &UnitId) -> Result<UnitStatus, IronbotError> {
        let record = match self.load_record(id).await? {
            Some(record) => record,
            None => UnitRecord::new(id.clone(), self.initial_state(id).await),
        };
        let alive = record
            .worker()
            .map(|worker| self.inner.launcher.is_alive(id, worker));
        if !record.state.expects_process() || alive == Some(true) {
            return Ok(UnitStatus::from_record(&record, alive));
        }

        if let Some(_guard) = self.try_lock_unit(id).await {
            let mut fresh = self.current_record(id).await?;
            self.refresh_liveness(&mut fresh).await?;
            return Ok(self.view(&fresh));
        }

        // 다른 작업이 진행 중: pid가 있는데 죽은 Running만 Crashed로 보고
        let mut view = UnitStatus::from_record(&record, alive);
        if record.state == ProcessState::Running && alive == Some(false) {
            view.state = ProcessState::Crashed;
        }
        Ok(view)
    }

    /// 워커 작업 루프의 실행 허가 판정
    ///
    /// 허가되면 `last_run_at = now`를 원자적으로 기록합니다.
    pub async fn acquire_run(&self, id: &UnitId) -> Result<RunDecision, IronbotError> {
        let plan = self.plan().await;
        let unit = plan.unit(id.as_str()).ok_or_else(|| IronbotError::NotFound {
            target: id.to_string(),
        })?;

        let _guard = self.lock_unit(id).await?;
        let mut record = self.current_record(id).await?;

        if record.state == ProcessState::Disabled {
            return Err(StateError::Disabled {
                unit: id.to_string(),
                operation: "acquire_run".to_owned(),
            }
            .into());
        }

        let now = Utc::now();
        let decision = cadence::decide(record.last_run_at, unit.rate_limit, now);
        match decision {
            RunDecision::Proceed => {
                record.last_run_at = Some(now);
                record.updated_at = now;
                self.save_record(&record).await?;
                debug!(unit_id = %id, "run granted");
            }
            RunDecision::Throttled { until } => {
                counter!(m::RUNS_THROTTLED_TOTAL).increment(1);
                debug!(unit_id = %id, %until, "run throttled");
            }
        }
        Ok(decision)
    }

    /// 유닛을 정지하고 레코드를 삭제합니다.
    pub async fn remove(&self, id: &UnitId) -> Result<(), IronbotError> {
        {
            let _guard = self.lock_unit(id).await?;
            if let Some(mut record) = self.load_record(id).await? {
                self.refresh_liveness(&mut record).await?;
                self.stop_locked(&mut record).await?;
            }
            self.inner.store.delete(id).await?;
            self.inner.records.write().await.remove(id);
        }
        self.inner.locks.lock().await.remove(id);
        self.publish_running_gauge().await;
        info!(unit_id = %id, "unit removed");
        Ok(())
    }

    /// 계획의 모든 유닛에 대해 죽은 워커를 찾아 정정합니다.
    ///
    /// 다른 작업이 잠금을 쥐고 있는 유닛은 건너뜁니다. 새로 `Crashed`가 된 유닛을 반환합니다.
    pub async fn poll_liveness(&self) -> Vec<UnitId> {
        let plan = self.plan().await;
        let mut crashed = Vec::new();

        for id in plan.unit_ids() {
            let Some(_guard) = self.try_lock_unit(id).await else {
                continue;
            };
            let mut record = match self.load_record(id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(unit_id = %id, error = %e, "liveness check skipped");
                    continue;
                }
            };
            match self.refresh_liveness(&mut record).await {
                Ok(true) if record.state == ProcessState::Crashed => crashed.push(id.clone()),
                Ok(_) => {}
                Err(e) => warn!(unit_id = %id, error = %e, "failed to record crashed unit"),
            }
        }

        self.publish_running_gauge().await;
        crashed
    }

    // ─── 내부 구현 ──────────────────────────────────────────────────

    async fn unit_lock(&self, id: &UnitId) -> Arc<Mutex<()>> {
        let mut locks = self.inner.locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }

    /// 내부 뮤텍스, 그다음 저장소 잠금 순으로 얻습니다.
    async fn lock_unit(&self, id: &UnitId) -> Result<UnitGuard, StoreError> {
        let local = self.unit_lock(id).await.lock_owned().await;
        let store = self.inner.store.lock(id).await?;
        Ok(UnitGuard {
            _store: store,
            _local: local,
        })
    }

    /// 잠금이 바로 비어 있지 않으면 `None`
    async fn try_lock_unit(&self, id: &UnitId) -> Option<UnitGuard> {
        let local = self.unit_lock(id).await.try_lock_owned().ok()?;
        let wait = self.inner.options.poll_interval;
        match tokio::time::timeout(wait, self.inner.store.lock(id)).await {
            Ok(Ok(store)) => Some(UnitGuard {
                _store: store,
                _local: local,
            }),
            Ok(Err(e)) => {
                warn!(unit_id = %id, error = %e, "unit lock unavailable");
                None
            }
            Err(_) => None,
        }
    }

    async fn initial_state(&self, id: &UnitId) -> ProcessState {
        match self.plan().await.unit(id.as_str()) {
            Some(unit) if !unit.enabled => ProcessState::Disabled,
            _ => ProcessState::Stopped,
        }
    }

    async fn load_record(&self, id: &UnitId) -> Result<Option<UnitRecord>, StoreError> {
        let record = self.inner.store.load(id).await?;
        let mut cache = self.inner.records.write().await;
        match &record {
            Some(record) => cache.insert(id.clone(), record.clone()),
            None => cache.remove(id),
        };
        Ok(record)
    }

    async fn save_record(&self, record: &UnitRecord) -> Result<(), StoreError> {
        self.inner.store.save(record).await?;
        self.inner
            .records
            .write()
            .await
            .insert(record.unit_id.clone(), record.clone());
        Ok(())
    }

    /// 저장된 레코드, 없으면 구성에 맞는 초기 레코드 (저장하지 않음)
    async fn current_record(&self, id: &UnitId) -> Result<UnitRecord, StoreError> {
        match self.load_record(id).await? {
            Some(record) => Ok(record),
            None => Ok(UnitRecord::new(id.clone(), self.initial_state(id).await)),
        }
    }

    /// 잠금을 쥔 상태에서 레코드를 읽고 생존 여부를 반영합니다.
    async fn locked_record(&self, id: &UnitId) -> Result<UnitRecord, StoreError> {
        let mut record = self.current_record(id).await?;
        self.refresh_liveness(&mut record).await?;
        Ok(record)
    }

    /// 프로세스가 있어야 하는데 없으면 레코드를 정정하고 저장합니다. 정정했으면 `true`
    async fn refresh_liveness(&self, record: &mut UnitRecord) -> Result<bool, StoreError> {
        if !record.state.expects_process() {
            return Ok(false);
        }
        let alive = record
            .worker()
            .is_some_and(|worker| self.inner.launcher.is_alive(&record.unit_id, worker));
        if alive {
            return Ok(false);
        }

        if record.state == ProcessState::Stopping {
            record.transition(ProcessState::Stopped);
        } else {
            warn!(unit_id = %record.unit_id, pid = ?record.pid, "worker is gone, marking crashed");
            counter!(m::UNIT_CRASHES_TOTAL).increment(1);
            record.transition(ProcessState::Crashed);
        }
        self.save_record(record).await?;
        Ok(true)
    }

    fn view(&self, record: &UnitRecord) -> UnitStatus {
        let alive = record
            .worker()
            .map(|worker| self.inner.launcher.is_alive(&record.unit_id, worker));
        UnitStatus::from_record(record, alive)
    }

    async fn start_locked(&self, record: &mut UnitRecord) -> Result<UnitStatus, IronbotError> {
        match record.state {
            ProcessState::Stopped | ProcessState::Crashed => {}
            ProcessState::Disabled => {
                debug!(unit_id = %record.unit_id, "start ignored: unit disabled");
                return Ok(self.view(record));
            }
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping => {
                return Ok(self.view(record));
            }
        }

        let id = record.unit_id.clone();
        let plan = self.plan().await;
        let unit = plan.unit(id.as_str()).ok_or_else(|| IronbotError::NotFound {
            target: id.to_string(),
        })?;

        let not_before = cadence::not_before(record.last_run_at, unit.rate_limit, Utc::now());
        record.transition(ProcessState::Starting);
        self.save_record(record).await?;

        let launched = self
            .inner
            .launcher
            .launch(LaunchRequest::for_unit(unit, not_before))
            .await;
        let LaunchedWorker { process, mut exit } = match launched {
            Ok(worker) => worker,
            Err(e) => {
                counter!(m::UNIT_LAUNCH_FAILURES_TOTAL).increment(1);
                warn!(unit_id = %id, error = %e, "launch failed");
                record.transition(ProcessState::Stopped);
                self.save_record(record).await?;
                return Err(e.into());
            }
        };

        let pid = process.pid;
        record.attach(process);
        if let Ok(exited) = tokio::time::timeout(self.inner.options.startup_probe, &mut exit).await {
            let code = exited.ok().and_then(|info| info.code);
            counter!(m::UNIT_LAUNCH_FAILURES_TOTAL).increment(1);
            warn!(unit_id = %id, pid, ?code, "worker exited during startup probe");
            record.last_exit_code = code;
            record.transition(ProcessState::Stopped);
            self.save_record(record).await?;
            return Err(LaunchError::ExitedImmediately {
                unit: id.to_string(),
                code,
            }
            .into());
        }

        record.started_at = Some(Utc::now());
        record.last_exit_code = None;
        record.transition(ProcessState::Running);
        if let Err(e) = self.save_record(record).await {
            // 기록되지 않은 워커를 남기지 않음
            let _ = self.inner.launcher.signal(&id, process, Signal::Kill);
            record.transition(ProcessState::Stopped);
            return Err(e.into());
        }

        self.watch_exit(id.clone(), process, exit);
        counter!(m::UNIT_STARTS_TOTAL, m::LABEL_GROUP => unit.group.clone()).increment(1);
        self.publish_running_gauge().await;
        info!(
            unit_id = %id,
            pid,
            not_before = ?not_before,
            "unit started"
        );
        Ok(self.view(record))
    }

    async fn stop_locked(&self, record: &mut UnitRecord) -> Result<UnitStatus, IronbotError> {
        match record.state {
            ProcessState::Stopped | ProcessState::Disabled => return Ok(self.view(record)),
            ProcessState::Crashed => {
                record.transition(ProcessState::Stopped);
                self.save_record(record).await?;
                return Ok(self.view(record));
            }
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping => {}
        }

        let started = Instant::now();
        if let Some(worker) = record.worker() {
            let previous = record.state;
            record.transition(ProcessState::Stopping);
            self.save_record(record).await?;

            if let Err(e) = self.terminate(&record.unit_id, worker).await {
                warn!(unit_id = %record.unit_id, pid = worker.pid, error = %e, "stop failed");
                record.transition(previous);
                self.save_record(record).await?;
                return Err(e.into());
            }
        }

        record.transition(ProcessState::Stopped);
        self.save_record(record).await?;
        counter!(m::UNIT_STOPS_TOTAL).increment(1);
        histogram!(m::UNIT_STOP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        self.publish_running_gauge().await;
        info!(unit_id = %record.unit_id, "unit stopped");
        Ok(self.view(record))
    }

    /// SIGTERM 후 유예 시간 동안 기다리고, 남아 있으면 SIGKILL
    async fn terminate(&self, unit: &UnitId, worker: WorkerProcess) -> Result<(), SignalError> {
        let launcher = &self.inner.launcher;
        let pid = worker.pid;
        launcher.signal(unit, worker, Signal::Term)?;
        if self.wait_for_exit(unit, worker, self.inner.options.stop_grace).await {
            return Ok(());
        }

        warn!(unit_id = %unit, pid, "worker ignored SIGTERM, escalating to SIGKILL");
        launcher.signal(unit, worker, Signal::Kill)?;
        if !self.wait_for_exit(unit, worker, self.inner.options.kill_timeout).await {
            warn!(unit_id = %unit, pid, "worker still present after SIGKILL");
        }
        Ok(())
    }

    async fn wait_for_exit(&self, unit: &UnitId, worker: WorkerProcess, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.inner.launcher.is_alive(unit, worker) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.inner.options.poll_interval).await;
        }
    }

    fn watch_exit(&self, id: UnitId, process: WorkerProcess, exit: oneshot::Receiver<ExitInfo>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            // 송신자가 사라지면 주기적 생존 확인에 맡김
            let Ok(info) = exit.await else {
                return;
            };
            supervisor.on_worker_exit(&id, process, info).await;
        });
    }

    async fn on_worker_exit(&self, id: &UnitId, process: WorkerProcess, info: ExitInfo) {
        let _guard = match self.lock_unit(id).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(unit_id = %id, error = %e, "cannot record worker exit");
                return;
            }
        };

        let mut record = match self.load_record(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(unit_id = %id, error = %e, "cannot record worker exit");
                return;
            }
        };
        // 관리 작업에 의한 종료이거나 이미 다른 워커로 교체됨
        if record.worker() != Some(process)
            || !matches!(record.state, ProcessState::Starting | ProcessState::Running)
        {
            return;
        }

        warn!(unit_id = %id, pid = process.pid, code = ?info.code, "worker exited unexpectedly");
        counter!(m::UNIT_CRASHES_TOTAL).increment(1);
        record.last_exit_code = info.code;
        record.transition(ProcessState::Crashed);
        if let Err(e) = self.save_record(&record).await {
            warn!(unit_id = %id, error = %e, "cannot record worker exit");
        }
        self.publish_running_gauge().await;
    }

    async fn publish_running_gauge(&self) {
        let running = self
            .inner
            .records
            .read()
            .await
            .values()
            .filter(|r| r.state == ProcessState::Running)
            .count();
        gauge!(m::UNITS_RUNNING).set(running as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStatusStore;
    use crate::testing::MockLauncher;
    use ironbot_core::unit::{Destinations, PipelineConfig, UnitSpec};

    struct Harness {
        supervisor: Supervisor,
        launcher: Arc<MockLauncher>,
        store: Arc<MemoryStatusStore>,
    }

    fn pipeline() -> Arc<PipelinePlan> {
        Arc::new(ironbot_topology::resolve(&pipeline_config()).unwrap())
    }

    fn pipeline_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.upsert_unit(
            UnitSpec::new("collector-A", "Collector", "/bin/collector")
                .with_rate_limit(3600)
                .with_destinations(Destinations::Default("parser-B".into())),
        );
        config.upsert_unit(UnitSpec::new("parser-B", "Parser", "/bin/parser"));
        let mut disabled = UnitSpec::new("archive", "Output", "/bin/archive");
        disabled.enabled = false;
        config.upsert_unit(disabled);
        config.upsert_unit(
            UnitSpec::new("feed", "Collector", "/bin/feed")
                .with_destinations(Destinations::Default("archive".into())),
        );
        config
    }

    async fn harness_with_store(store: Arc<MemoryStatusStore>) -> Harness {
        let launcher = Arc::new(MockLauncher::new());
        let supervisor = Supervisor::new(
            store.clone(),
            launcher.clone(),
            SupervisorOptions::default(),
        );
        supervisor.reconcile(pipeline()).await;
        Harness {
            supervisor,
            launcher,
            store,
        }
    }

    async fn harness() -> Harness {
        harness_with_store(Arc::new(MemoryStatusStore::new())).await
    }

    fn id(s: &str) -> UnitId {
        UnitId::from(s)
    }

    #[tokio::test(start_paused = true)]
    async fn start_from_stopped_runs_worker() {
        let h = harness().await;

        let status = h.supervisor.start(&id("parser-B")).await.unwrap();

        assert_eq!(status.state, ProcessState::Running);
        assert!(status.pid.is_some());
        assert_eq!(status.alive, Some(true));
        assert_eq!(h.launcher.launches().len(), 1);
        assert!(h.launcher.launches()[0].not_before().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_launches_once() {
        let h = harness().await;
        h.supervisor.start(&id("parser-B")).await.unwrap();
        let status = h.supervisor.start(&id("parser-B")).await.unwrap();

        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(h.launcher.launches().len(), 1, "running unit must not relaunch");
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_last_run_survives_restart_and_throttles() {
        // Given: 이전 프로세스가 방금 실행 허가를 받았음
        let store = Arc::new(MemoryStatusStore::new());
        let first = harness_with_store(store.clone()).await;
        assert!(first.supervisor.acquire_run(&id("collector-A")).await.unwrap().is_proceed());

        // When: 새 감독자 (재시작) 가 같은 저장소로 유닛을 시작
        let second = harness_with_store(store).await;
        let status = second.supervisor.start(&id("collector-A")).await.unwrap();

        // Then: 실행 상태이지만 작업 루프는 주기 제한에 걸림
        assert_eq!(status.state, ProcessState::Running);
        assert!(second.launcher.launches()[0].not_before().is_some());
        let decision = second.supervisor.acquire_run(&id("collector-A")).await.unwrap();
        assert!(matches!(decision, RunDecision::Throttled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn force_run_then_status_shows_reset_and_running() {
        let h = harness().await;
        h.supervisor.acquire_run(&id("collector-A")).await.unwrap();

        h.supervisor.force_run(&id("collector-A")).await.unwrap();
        let status = h.supervisor.status(&id("collector-A")).await.unwrap();

        assert_eq!(status.state, ProcessState::Running);
        assert!(status.last_run_at.is_none());
        assert!(status.last_forced_at.is_some());
        assert!(h.launcher.launches()[0].not_before().is_none());
        assert!(h.supervisor.acquire_run(&id("collector-A")).await.unwrap().is_proceed());
        assert!(!h.supervisor.acquire_run(&id("collector-A")).await.unwrap().is_proceed());
    }

    #[tokio::test(start_paused = true)]
    async fn force_run_on_running_unit_wakes_worker() {
        let h = harness().await;
        let pid = h.supervisor.start(&id("parser-B")).await.unwrap().pid.unwrap();

        h.supervisor.force_run(&id("parser-B")).await.unwrap();

        assert!(h.launcher.signals().contains(&(pid, Signal::Usr1)));
        assert_eq!(h.launcher.launches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_escalates_to_sigkill_after_grace() {
        let h = harness().await;
        let pid = h.supervisor.start(&id("parser-B")).await.unwrap().pid.unwrap();
        h.launcher.ignore_sigterm(true);

        let status = h.supervisor.stop(&id("parser-B")).await.unwrap();

        assert_eq!(status.state, ProcessState::Stopped);
        assert_eq!(status.pid, None);
        assert_eq!(
            h.launcher.signals(),
            vec![(pid, Signal::Term), (pid, Signal::Kill)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_on_stopped_unit_is_noop() {
        let h = harness().await;
        let status = h.supervisor.stop(&id("parser-B")).await.unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
        assert!(h.launcher.signals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_leaves_unit_stopped() {
        let h = harness().await;
        h.launcher.fail_module("/bin/parser");

        let err = h.supervisor.start(&id("parser-B")).await.unwrap_err();

        assert_eq!(err.kind(), "launch");
        let status = h.supervisor.status(&id("parser-B")).await.unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_exit_is_launch_error() {
        let h = harness().await;
        h.launcher.exit_immediately("/bin/parser");

        let err = h.supervisor.start(&id("parser-B")).await.unwrap_err();

        assert!(matches!(
            err,
            IronbotError::Launch(LaunchError::ExitedImmediately { code: Some(1), .. })
        ));
        let status = h.supervisor.status(&id("parser-B")).await.unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
        assert_eq!(status.last_exit_code, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_exit_marks_crashed_without_restart() {
        let h = harness().await;
        let pid = h.supervisor.start(&id("parser-B")).await.unwrap().pid.unwrap();

        h.launcher.crash(pid, 3);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = h.supervisor.status(&id("parser-B")).await.unwrap();
        assert_eq!(status.state, ProcessState::Crashed);
        assert_eq!(status.last_exit_code, Some(3));
        assert_eq!(h.launcher.launches().len(), 1, "no automatic restart");
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_worker_is_found_by_liveness_sweep() {
        let h = harness().await;
        let pid = h.supervisor.start(&id("parser-B")).await.unwrap().pid.unwrap();

        h.launcher.vanish(pid);
        let crashed = h.supervisor.poll_liveness().await;

        assert_eq!(crashed, vec![id("parser-B")]);
        let record = h.store.load(&id("parser-B")).await.unwrap().unwrap();
        assert_eq!(record.state, ProcessState::Crashed);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_crashed_for_dead_pid() {
        let h = harness().await;
        let pid = h.supervisor.start(&id("parser-B")).await.unwrap().pid.unwrap();
        h.launcher.vanish(pid);

        let status = h.supervisor.status(&id("parser-B")).await.unwrap();

        assert_eq!(status.state, ProcessState::Crashed);
        assert_eq!(status.alive, None);
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_unit_can_be_started_again() {
        let h = harness().await;
        let pid = h.supervisor.start(&id("parser-B")).await.unwrap().pid.unwrap();
        h.launcher.vanish(pid);

        let status = h.supervisor.start(&id("parser-B")).await.unwrap();

        assert_eq!(status.state, ProcessState::Running);
        assert_ne!(status.pid, Some(pid));
    }

    #[tokio::test(start_paused = true)]
    async fn configured_disabled_unit_lifecycle() {
        let h = harness().await;
        let archive = id("archive");

        // reconcile이 Disabled 레코드를 만들었음
        assert_eq!(
            h.supervisor.status(&archive).await.unwrap().state,
            ProcessState::Disabled
        );
        assert_eq!(
            h.supervisor.start(&archive).await.unwrap().state,
            ProcessState::Disabled
        );
        assert_eq!(h.supervisor.force_run(&archive).await.unwrap_err().kind(), "state");
        assert!(h.launcher.launches().is_empty());

        h.supervisor.enable(&archive).await.unwrap();
        let status = h.supervisor.start(&archive).await.unwrap();
        assert_eq!(status.state, ProcessState::Running);

        let status = h.supervisor.disable(&archive).await.unwrap();
        assert_eq!(status.state, ProcessState::Disabled);
        assert_eq!(h.launcher.alive_count(), 0, "disable stops the worker");
    }

    #[tokio::test(start_paused = true)]
    async fn reload_signals_only_running_units() {
        let h = harness().await;
        h.supervisor.reload(&id("parser-B")).await.unwrap();
        assert!(h.launcher.signals().is_empty());

        let pid = h.supervisor.start(&id("parser-B")).await.unwrap().pid.unwrap();
        h.supervisor.reload(&id("parser-B")).await.unwrap();
        assert_eq!(h.launcher.signals(), vec![(pid, Signal::Hup)]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_worker() {
        let h = harness().await;
        let first = h.supervisor.start(&id("parser-B")).await.unwrap().pid;

        let status = h.supervisor.restart(&id("parser-B")).await.unwrap();

        assert_eq!(status.state, ProcessState::Running);
        assert_ne!(status.pid, first);
        assert_eq!(h.launcher.launches().len(), 2);
        assert_eq!(h.launcher.alive_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_start_and_stop_end_in_defined_state() {
        let h = harness().await;
        let unit = id("parser-B");

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let supervisor = h.supervisor.clone();
            let unit = unit.clone();
            tasks.spawn(async move {
                if i % 2 == 0 {
                    supervisor.start(&unit).await
                } else {
                    supervisor.stop(&unit).await
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let status = h.supervisor.status(&unit).await.unwrap();
        match status.state {
            ProcessState::Running => assert_eq!(h.launcher.alive_count(), 1),
            ProcessState::Stopped => assert_eq!(h.launcher.alive_count(), 0),
            other => panic!("unexpected final state {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_surfaces_as_store_error() {
        let h = harness().await;
        h.store.set_unavailable(true);

        let err = h.supervisor.start(&id("parser-B")).await.unwrap_err();

        assert_eq!(err.kind(), "store");
        assert!(h.launcher.launches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_stops_worker_and_deletes_record() {
        let h = harness().await;
        h.supervisor.start(&id("parser-B")).await.unwrap();

        h.supervisor.remove(&id("parser-B")).await.unwrap();

        assert_eq!(h.launcher.alive_count(), 0);
        assert!(h.store.load(&id("parser-B")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_run_for_unknown_unit_is_not_found() {
        let h = harness().await;
        let err = h.supervisor.acquire_run(&id("ghost")).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_adopts_live_and_corrects_dead_workers() {
        let store = Arc::new(MemoryStatusStore::new());
        let h = harness_with_store(store.clone()).await;
        let live = h.supervisor.start(&id("parser-B")).await.unwrap();
        let dead = h.supervisor.start(&id("collector-A")).await.unwrap();
        h.launcher.vanish(dead.pid.unwrap());

        let summary = h.supervisor.reconcile(pipeline()).await;

        assert_eq!(summary.adopted, 1);
        assert_eq!(summary.corrected, 1);
        assert_eq!(
            h.supervisor.status(&id("parser-B")).await.unwrap().pid,
            live.pid
        );
        assert_eq!(
            store.load(&id("collector-A")).await.unwrap().unwrap().state,
            ProcessState::Crashed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reused_pid_is_neither_adopted_nor_signalled() {
        // Given: 실행 중이던 워커가 사라지고 무관한 프로세스가 같은 pid를 받음
        let h = harness().await;
        let pid = h.supervisor.start(&id("parser-B")).await.unwrap().pid.unwrap();
        h.launcher.reuse_pid(pid);

        // When
        let summary = h.supervisor.reconcile(pipeline()).await;
        let status = h.supervisor.stop(&id("parser-B")).await.unwrap();

        // Then: 죽은 워커로 정정되고 그 pid에는 시그널이 가지 않음
        assert_eq!(summary.adopted, 0);
        assert_eq!(summary.corrected, 1);
        assert_eq!(status.state, ProcessState::Stopped);
        assert!(h.launcher.signals().is_empty());
        assert!(h.launcher.is_running(pid), "unrelated process must survive");
    }

    #[tokio::test(start_paused = true)]
    async fn record_pointing_at_foreign_process_is_corrected() {
        // Given: 다른 프로세스의 pid를 가진 Running 레코드 (시작 시각 없음)
        let h = harness().await;
        let foreign = h.launcher.foreign_process();
        let mut record = UnitRecord::new(id("parser-B"), ProcessState::Running);
        record.pid = Some(foreign);
        h.store.save(&record).await.unwrap();

        // When
        let status = h.supervisor.status(&id("parser-B")).await.unwrap();
        h.supervisor.remove(&id("parser-B")).await.unwrap();

        // Then
        assert_eq!(status.state, ProcessState::Crashed);
        assert!(h.launcher.signals().is_empty());
        assert!(h.launcher.is_running(foreign));
    }

    #[tokio::test(start_paused = true)]
    async fn supervisors_sharing_a_store_launch_one_worker() {
        // Given: 같은 저장소를 쓰는 두 감독자 (CLI와 데몬)
        let store = Arc::new(MemoryStatusStore::new());
        let launcher = Arc::new(MockLauncher::new());
        let first = Supervisor::new(store.clone(), launcher.clone(), SupervisorOptions::default());
        let second = Supervisor::new(store.clone(), launcher.clone(), SupervisorOptions::default());
        first.reconcile(pipeline()).await;
        second.reconcile(pipeline()).await;

        // When: 동시에 같은 유닛을 시작
        let unit = id("parser-B");
        let (a, b) = tokio::join!(first.start(&unit), second.start(&unit));

        // Then: 워커는 하나이고 양쪽이 같은 pid를 봄
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(launcher.launches().len(), 1);
        assert_eq!(launcher.alive_count(), 1);
        assert_eq!(a.pid, b.pid);
        assert_eq!(b.state, ProcessState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_retires_units_missing_from_plan() {
        // Given: feed 워커가 실행 중
        let h = harness().await;
        h.supervisor.start(&id("feed")).await.unwrap();
        h.supervisor.start(&id("parser-B")).await.unwrap();

        // When: feed가 빠진 계획으로 조정
        let mut config = pipeline_config();
        config.remove_unit("feed");
        let plan = Arc::new(ironbot_topology::resolve(&config).unwrap());
        let summary = h.supervisor.reconcile(plan).await;

        // Then: feed 워커는 정지되고 레코드가 사라짐
        assert_eq!(summary.retired, 1);
        assert_eq!(summary.adopted, 1);
        assert_eq!(h.launcher.alive_count(), 1);
        assert!(h.store.load(&id("feed")).await.unwrap().is_none());
        assert_eq!(
            h.supervisor.status(&id("parser-B")).await.unwrap().state,
            ProcessState::Running
        );
    }
}
