//! 해석된 파이프라인 계획
//!
//! [`PipelinePlan`]은 불변입니다. 구성이 바뀌면 새 계획을 만들어 통째로 교체합니다.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use ironbot_core::error::IronbotError;
use ironbot_core::unit::UnitId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// 유닛 간 연결 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    /// 라우팅 키. 기본 목적지는 `"*"`
    pub routing_key: String,
    pub target: UnitId,
    /// 대상 유닛의 소스 큐 이름
    pub queue: String,
}

/// 기본값이 병합되고 큐 이름이 파생된 유닛
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedUnit {
    pub id: UnitId,
    pub group: String,
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    pub parameters: Map<String, Value>,
    /// 실효 주기 제한 (초). 0이면 제한 없음
    pub rate_limit: u64,
    pub source_queue: String,
    pub internal_queue: String,
    /// 라우팅 키 순으로 정렬된 출력 연결
    pub edges: Vec<Edge>,
}

impl ResolvedUnit {
    /// 라우팅 키 → 목적지 큐 이름
    pub fn destination_queues(&self) -> BTreeMap<String, String> {
        self.edges
            .iter()
            .map(|e| (e.routing_key.clone(), e.queue.clone()))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.edges.is_empty()
    }
}

/// 큐 목록 조회 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Source,
    Destination,
    Internal,
    All,
}

impl FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" => Ok(Self::Source),
            "destination" => Ok(Self::Destination),
            "internal" => Ok(Self::Internal),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown queue kind '{other}' (expected source, destination, internal, all)"
            )),
        }
    }
}

/// 제어 작업 대상
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "name", rename_all = "lowercase")]
pub enum Target {
    /// 모든 유닛
    All,
    /// 그룹 이름 (대소문자 무시)
    Group(String),
    /// 단일 유닛. 해당 ID가 없으면 같은 이름의 그룹으로 해석합니다.
    Unit(UnitId),
}

impl Target {
    /// `"all"`, 복수형 그룹 별칭(`collectors`, `parsers`, `experts`, `outputs`), 또는 유닛 ID
    pub fn parse(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "" | "all" => Self::All,
            "collectors" => Self::Group("Collector".to_owned()),
            "parsers" => Self::Group("Parser".to_owned()),
            "experts" => Self::Group("Expert".to_owned()),
            "outputs" => Self::Group("Output".to_owned()),
            _ => Self::Unit(UnitId::from(raw.trim())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Group(g) => write!(f, "group {g}"),
            Self::Unit(id) => write!(f, "{id}"),
        }
    }
}

/// 두 계획 사이의 변경 내역
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanDiff {
    pub added: Vec<UnitId>,
    pub removed: Vec<UnitId>,
    pub changed: Vec<UnitId>,
}

impl PlanDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// 해석이 끝난 파이프라인 토폴로지
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelinePlan {
    units: BTreeMap<UnitId, ResolvedUnit>,
    allow_cycles: bool,
    fingerprint: String,
}

impl Default for PipelinePlan {
    fn default() -> Self {
        Self::new(BTreeMap::new(), false)
    }
}

impl PipelinePlan {
    pub(crate) fn new(units: BTreeMap<UnitId, ResolvedUnit>, allow_cycles: bool) -> Self {
        let fingerprint = fingerprint(&units, allow_cycles);
        Self {
            units,
            allow_cycles,
            fingerprint,
        }
    }

    /// 유닛이 하나도 없는 계획
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn unit(&self, id: &str) -> Option<&ResolvedUnit> {
        self.units.get(id)
    }

    pub fn units(&self) -> impl Iterator<Item = &ResolvedUnit> {
        self.units.values()
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = &UnitId> {
        self.units.keys()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn allows_cycles(&self) -> bool {
        self.allow_cycles
    }

    /// 계획 내용의 SHA-256 지문 (소문자 hex)
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// 종류별 큐 이름을 정렬, 중복 제거하여 반환합니다.
    pub fn queues(&self, kind: QueueKind) -> Vec<String> {
        let mut out = BTreeSet::new();
        for unit in self.units.values() {
            if matches!(kind, QueueKind::Source | QueueKind::All) {
                out.insert(unit.source_queue.clone());
            }
            if matches!(kind, QueueKind::Internal | QueueKind::All) {
                out.insert(unit.internal_queue.clone());
            }
            if matches!(kind, QueueKind::Destination | QueueKind::All) {
                out.extend(unit.edges.iter().map(|e| e.queue.clone()));
            }
        }
        out.into_iter().collect()
    }

    /// 대상에 해당하는 유닛 ID를 정렬된 순서로 반환합니다.
    ///
    /// 일치하는 유닛이 없는 그룹/ID는 `NotFound`입니다. `All`은 빈 계획에서도 성공합니다.
    pub fn units_in(&self, target: &Target) -> Result<Vec<UnitId>, IronbotError> {
        let selected: Vec<UnitId> = match target {
            Target::All => return Ok(self.units.keys().cloned().collect()),
            Target::Unit(id) if self.units.contains_key(id.as_str()) => vec![id.clone()],
            Target::Unit(id) => self.group_members(id.as_str()),
            Target::Group(group) => self.group_members(group),
        };

        if selected.is_empty() {
            return Err(IronbotError::NotFound {
                target: target.to_string(),
            });
        }
        Ok(selected)
    }

    fn group_members(&self, group: &str) -> Vec<UnitId> {
        self.units
            .values()
            .filter(|u| u.group.eq_ignore_ascii_case(group))
            .map(|u| u.id.clone())
            .collect()
    }

    /// `self`에서 `next`로 바뀔 때 추가, 제거, 변경된 유닛
    pub fn diff(&self, next: &PipelinePlan) -> PlanDiff {
        let mut diff = PlanDiff::default();
        for (id, unit) in &next.units {
            match self.units.get(id) {
                None => diff.added.push(id.clone()),
                Some(prev) if prev != unit => diff.changed.push(id.clone()),
                Some(_) => {}
            }
        }
        diff.removed = self
            .units
            .keys()
            .filter(|id| !next.units.contains_key(id.as_str()))
            .cloned()
            .collect();
        diff
    }
}

fn fingerprint(units: &BTreeMap<UnitId, ResolvedUnit>, allow_cycles: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update([u8::from(allow_cycles)]);
    for unit in units.values() {
        for field in [unit.id.as_str(), unit.group.as_str(), unit.module.as_str()] {
            hasher.update(field.as_bytes());
            hasher.update([0]);
        }
        match &unit.description {
            Some(text) => {
                hasher.update([1]);
                hasher.update(text.as_bytes());
                hasher.update([0]);
            }
            None => hasher.update([0]),
        }
        hasher.update([u8::from(unit.enabled)]);
        hasher.update(unit.rate_limit.to_le_bytes());
        // serde_json 맵은 키 정렬 상태이므로 출력이 결정적
        hasher.update(Value::Object(unit.parameters.clone()).to_string().as_bytes());
        for edge in &unit.edges {
            hasher.update(edge.routing_key.as_bytes());
            hasher.update([0]);
            hasher.update(edge.target.as_str().as_bytes());
            hasher.update([0]);
        }
        hasher.update([0xff]);
    }
    format!("{:x}", hasher.finalize())
}
