//! 기본값 계층: 전역/그룹 기본값과 유닛 설정 병합
//!
//! 우선순위는 유닛 > 그룹 > 전역입니다.
//! `parameters`는 키 단위로 깊게 병합되고(중첩 객체는 재귀 병합, 그 외 값은 통째로 교체),
//! `rate_limit`은 단일 값 덮어쓰기입니다.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::unit::{BUILTIN_GROUPS, UnitSpec};

/// 한 계층(전역 또는 그룹)이 제공하는 기본값
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerOverrides {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,
}

/// 기본값 계층
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultsLayer {
    /// `true`면 내장 그룹도 아니고 `groups`에 선언되지도 않은 그룹을 거부합니다.
    #[serde(default)]
    pub strict_groups: bool,

    #[serde(default)]
    pub global: LayerOverrides,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, LayerOverrides>,
}

impl DefaultsLayer {
    /// 그룹이 알려진 그룹인지 확인합니다.
    pub fn knows_group(&self, group: &str) -> bool {
        BUILTIN_GROUPS.contains(&group) || self.groups.contains_key(group)
    }
}

/// 병합 결과
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EffectiveUnitConfig {
    pub parameters: Map<String, Value>,
    /// 실효 주기 제한 (초). 어떤 계층에도 없으면 0
    pub rate_limit: u64,
}

/// 기본값 계층과 유닛 설정을 병합합니다.
pub fn merge(defaults: &DefaultsLayer, unit: &UnitSpec) -> Result<EffectiveUnitConfig, ConfigError> {
    if defaults.strict_groups && !defaults.knows_group(&unit.group) {
        return Err(ConfigError::UnknownGroup {
            unit: unit.id.to_string(),
            group: unit.group.clone(),
        });
    }

    let group = defaults.groups.get(&unit.group);

    let mut parameters = defaults.global.parameters.clone();
    if let Some(group) = group {
        deep_merge(&mut parameters, &group.parameters);
    }
    deep_merge(&mut parameters, &unit.parameters);

    let rate_limit = unit
        .rate_limit
        .or_else(|| group.and_then(|g| g.rate_limit))
        .or(defaults.global.rate_limit)
        .unwrap_or(0);

    Ok(EffectiveUnitConfig {
        parameters,
        rate_limit,
    })
}

/// `overlay`를 `base` 위에 깊게 병합합니다.
///
/// 양쪽 모두 객체인 키만 재귀적으로 병합하고, 나머지는 `overlay` 값으로 교체합니다.
pub fn deep_merge(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}
