//! 관리 파사드: 구성, 계획, 감독자를 하나의 API로 묶음
//!
//! CLI와 HTTP 서버는 입력을 파싱하고 결과를 렌더링할 뿐, 상태를 가진 로직은 모두 여기에 있습니다.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use ironbot_core::error::IronbotError;
use ironbot_core::metrics as m;
use ironbot_core::unit::{PipelineConfig, UnitId, UnitSpec};
use ironbot_supervisor::{RunDecision, Supervisor, UnitStatus};
use ironbot_topology::{PipelinePlan, QueueKind, ResolvedUnit, Target};
use metrics::counter;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::report::{BatchReport, OutcomeError, OutcomeResult, ResolveReport, UnitOutcome, VersionInfo};

/// 대상 단위로 적용되는 제어 작업
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
    Restart,
    Reload,
    ForceRun,
    Status,
    Enable,
    Disable,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Self::Start,
        Self::Stop,
        Self::Restart,
        Self::Reload,
        Self::ForceRun,
        Self::Status,
        Self::Enable,
        Self::Disable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reload => "reload",
            Self::ForceRun => "force-run",
            Self::Status => "status",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }

    /// 유닛 상태를 바꾸는 작업인지
    pub fn is_mutating(self) -> bool {
        self != Self::Status
    }

    async fn apply(self, supervisor: &Supervisor, id: &UnitId) -> Result<UnitStatus, IronbotError> {
        match self {
            Self::Start => supervisor.start(id).await,
            Self::Stop => supervisor.stop(id).await,
            Self::Restart => supervisor.restart(id).await,
            Self::Reload => supervisor.reload(id).await,
            Self::ForceRun => supervisor.force_run(id).await,
            Self::Status => supervisor.status(id).await,
            Self::Enable => supervisor.enable(id).await,
            Self::Disable => supervisor.disable(id).await,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| format!("unknown operation '{s}'"))
    }
}

/// 관리 파사드
pub struct Controller {
    supervisor: Supervisor,
    /// 현재 적용된 구성 문서. 계획 교체를 직렬화하는 잠금을 겸함
    config: Mutex<PipelineConfig>,
    config_path: Option<PathBuf>,
    limiter: Arc<Semaphore>,
}

impl Controller {
    /// 빈 구성으로 시작합니다. `max_concurrent_ops`는 동시에 실행되는 유닛 작업 수의 상한입니다.
    pub fn new(supervisor: Supervisor, max_concurrent_ops: usize) -> Self {
        Self {
            supervisor,
            config: Mutex::new(PipelineConfig::default()),
            config_path: None,
            limiter: Arc::new(Semaphore::new(max_concurrent_ops.max(1))),
        }
    }

    /// 해석에 성공한 구성을 이 경로에 저장합니다.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// `path`의 구성을 읽어 적용한 컨트롤러를 만듭니다. 파일은 다시 쓰지 않습니다.
    pub async fn open(
        path: impl AsRef<Path>,
        supervisor: Supervisor,
        max_concurrent_ops: usize,
    ) -> Result<(Self, ResolveReport), IronbotError> {
        let path = path.as_ref();
        let config = PipelineConfig::load(path).await?;
        let controller = Self::new(supervisor, max_concurrent_ops).with_config_path(path);
        let report = controller.apply(config, false).await?;
        Ok((controller, report))
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn version(&self) -> VersionInfo {
        VersionInfo {
            name: "ironbot",
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    // ─── 계획 ──────────────────────────────────────────────────────

    /// 현재 계획
    pub async fn plan(&self) -> Arc<PipelinePlan> {
        self.supervisor.plan().await
    }

    /// 현재 적용된 구성 문서의 복사본
    pub async fn config(&self) -> PipelineConfig {
        self.config.lock().await.clone()
    }

    /// 구성을 해석하여 성공하면 계획을 교체하고 저장합니다.
    ///
    /// 실패하면 모든 해석 에러를 돌려주고 현재 계획은 그대로 유지됩니다.
    pub async fn resolve(&self, config: PipelineConfig) -> Result<ResolveReport, IronbotError> {
        self.apply(config, true).await
    }

    /// 적용 없이 해석만 합니다.
    pub async fn check(&self, config: &PipelineConfig) -> Result<ResolveReport, IronbotError> {
        let next = ironbot_topology::resolve(config)?;
        let current = self.plan().await;
        Ok(report_for(&current, &next, false, None))
    }

    /// 유닛을 추가하거나 교체한 구성을 적용합니다.
    pub async fn add_unit(&self, spec: UnitSpec) -> Result<ResolveReport, IronbotError> {
        let mut config = self.config().await;
        config.upsert_unit(spec);
        self.resolve(config).await
    }

    /// 유닛을 정지, 레코드 삭제 후 구성에서 제거합니다.
    ///
    /// 제거 후 구성이 해석되지 않으면(다른 유닛이 가리키는 경우 등) 아무것도 바꾸지 않습니다.
    pub async fn remove_unit(&self, id: &UnitId) -> Result<ResolveReport, IronbotError> {
        let mut guard = self.config.lock().await;
        let mut next = guard.clone();
        if next.remove_unit(id.as_str()).is_none() {
            return Err(IronbotError::NotFound {
                target: id.to_string(),
            });
        }
        let plan = ironbot_topology::resolve(&next)?;

        self.supervisor.remove(id).await?;
        let report = self.install(&mut guard, next, plan, true).await?;
        info!(unit_id = %id, "unit removed from pipeline");
        Ok(report)
    }

    async fn apply(&self, config: PipelineConfig, save: bool) -> Result<ResolveReport, IronbotError> {
        let mut guard = self.config.lock().await;
        let plan = match ironbot_topology::resolve(&config) {
            Ok(plan) => plan,
            Err(errors) => {
                warn!(errors = errors.len(), "pipeline resolution failed");
                return Err(errors.into());
            }
        };
        self.install(&mut guard, config, plan, save).await
    }

    async fn install(
        &self,
        current: &mut PipelineConfig,
        config: PipelineConfig,
        plan: PipelinePlan,
        save: bool,
    ) -> Result<ResolveReport, IronbotError> {
        if save {
            if let Some(path) = &self.config_path {
                config.save(path).await?;
            }
        }

        let previous = self.plan().await;
        let plan = Arc::new(plan);
        let summary = self.supervisor.reconcile(plan.clone()).await;
        let report = report_for(&previous, &plan, true, Some(summary));
        *current = config;

        info!(
            fingerprint = %report.fingerprint,
            units = report.units,
            added = report.diff.added.len(),
            removed = report.diff.removed.len(),
            changed = report.diff.changed.len(),
            "pipeline plan applied"
        );
        Ok(report)
    }

    // ─── 유닛 작업 ──────────────────────────────────────────────────

    pub async fn start(&self, target: &Target) -> Result<BatchReport, IronbotError> {
        self.run(Operation::Start, target).await
    }

    pub async fn stop(&self, target: &Target) -> Result<BatchReport, IronbotError> {
        self.run(Operation::Stop, target).await
    }

    pub async fn restart(&self, target: &Target) -> Result<BatchReport, IronbotError> {
        self.run(Operation::Restart, target).await
    }

    pub async fn reload(&self, target: &Target) -> Result<BatchReport, IronbotError> {
        self.run(Operation::Reload, target).await
    }

    pub async fn force_run(&self, target: &Target) -> Result<BatchReport, IronbotError> {
        self.run(Operation::ForceRun, target).await
    }

    pub async fn status(&self, target: &Target) -> Result<BatchReport, IronbotError> {
        self.run(Operation::Status, target).await
    }

    pub async fn enable(&self, target: &Target) -> Result<BatchReport, IronbotError> {
        self.run(Operation::Enable, target).await
    }

    pub async fn disable(&self, target: &Target) -> Result<BatchReport, IronbotError> {
        self.run(Operation::Disable, target).await
    }

    /// 대상의 모든 유닛에 작업을 병렬로 적용합니다.
    ///
    /// 대상이 비면 `NotFound`. 유닛 하나의 실패는 해당 행에만 기록됩니다.
    pub async fn run(&self, operation: Operation, target: &Target) -> Result<BatchReport, IronbotError> {
        let plan = self.plan().await;
        let units = plan.units_in(target)?;

        let mut tasks = JoinSet::new();
        for (index, id) in units.iter().cloned().enumerate() {
            let supervisor = self.supervisor.clone();
            let limiter = self.limiter.clone();
            tasks.spawn(async move {
                // 세마포어는 닫지 않으므로 실패하지 않음
                let _permit = limiter.acquire_owned().await.ok();
                let result = operation.apply(&supervisor, &id).await;
                (index, UnitOutcome::from_result(id, result))
            });
        }

        let mut slots: Vec<Option<UnitOutcome>> = vec![None; units.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(operation = %operation, error = %e, "unit task failed"),
            }
        }

        let outcomes: Vec<UnitOutcome> = units
            .into_iter()
            .zip(slots)
            .map(|(id, slot)| {
                slot.unwrap_or_else(|| UnitOutcome {
                    unit_id: id,
                    result: OutcomeResult::Error(OutcomeError {
                        kind: "internal".to_owned(),
                        message: "operation task aborted".to_owned(),
                    }),
                })
            })
            .collect();

        for outcome in &outcomes {
            let result = if outcome.is_ok() { "ok" } else { "error" };
            counter!(
                m::CONTROL_OPERATIONS_TOTAL,
                m::LABEL_OPERATION => operation.as_str(),
                m::LABEL_RESULT => result
            )
            .increment(1);
        }

        let report = BatchReport {
            operation: operation.as_str().to_owned(),
            target: target.to_string(),
            outcomes,
        };
        if operation.is_mutating() {
            info!(
                operation = %operation,
                target = %target,
                units = report.outcomes.len(),
                failed = report.failed(),
                "operation completed"
            );
        }
        Ok(report)
    }

    // ─── 조회 ──────────────────────────────────────────────────────

    /// 대상에 해당하는 해석된 유닛 목록
    pub async fn units(&self, target: &Target) -> Result<Vec<ResolvedUnit>, IronbotError> {
        let plan = self.plan().await;
        let ids = plan.units_in(target)?;
        Ok(ids
            .iter()
            .filter_map(|id| plan.unit(id.as_str()).cloned())
            .collect())
    }

    /// 큐 이름 목록 (정렬, 중복 제거)
    pub async fn queues(&self, kind: QueueKind) -> Vec<String> {
        self.plan().await.queues(kind)
    }

    /// 워커 작업 루프의 실행 허가 판정
    pub async fn acquire_run(&self, id: &UnitId) -> Result<RunDecision, IronbotError> {
        self.supervisor.acquire_run(id).await
    }

    /// 죽은 워커를 찾아 정정합니다. 새로 `Crashed`가 된 유닛을 반환합니다.
    pub async fn poll_liveness(&self) -> Vec<UnitId> {
        self.supervisor.poll_liveness().await
    }
}

fn report_for(
    current: &PipelinePlan,
    next: &PipelinePlan,
    applied: bool,
    reconcile: Option<ironbot_supervisor::ReconcileSummary>,
) -> ResolveReport {
    ResolveReport {
        fingerprint: next.fingerprint().to_owned(),
        units: next.len(),
        queues: next.queues(QueueKind::All).len(),
        diff: current.diff(next),
        applied,
        reconcile,
    }
}
