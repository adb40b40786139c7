//! 유닛 설정 모델: 파이프라인 구성 문서
//!
//! [`PipelineConfig`]는 사용자가 작성하는 `pipeline.toml`의 최상위 구조입니다.
//! 유닛은 ID를 키로 하는 테이블(`[units.<id>]`)로 선언되므로
//! 중복 ID는 TOML 파서 단계에서 거부됩니다.
//!
//! ```toml
//! [defaults.global.parameters]
//! redis_host = "127.0.0.1"
//!
//! [units.feed-collector]
//! group = "Collector"
//! module = "/usr/local/bin/feed-collector"
//! destinations = "feed-parser"
//! rate_limit = 3600
//!
//! [units.feed-parser]
//! group = "Parser"
//! module = "/usr/local/bin/feed-parser"
//! ```

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::defaults::DefaultsLayer;
use crate::error::{ConfigError, IronbotError};

/// 구조적으로 특별한 의미를 갖는 유일한 그룹. 모든 유닛은 이 그룹에서 도달 가능해야 합니다.
pub const ENTRY_GROUP: &str = "Collector";

/// 내장 그룹 태그
pub const BUILTIN_GROUPS: [&str; 4] = ["Collector", "Parser", "Expert", "Output"];

/// 기본 목적지를 나타내는 와일드카드 라우팅 키
pub const DEFAULT_ROUTING_KEY: &str = "*";

/// 유닛 식별자
///
/// 큐 이름과 상태 파일 이름이 ID에서 파생되므로 `[A-Za-z0-9._-]`만 허용합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ID 문자 집합 검사
    pub fn is_valid(&self) -> bool {
        is_valid_unit_id(&self.0)
    }

    /// 이 유닛이 소비하는 큐 이름
    pub fn source_queue(&self) -> String {
        format!("{}-queue", self.0)
    }

    /// 처리 중 이벤트를 보관하는 내부 큐 이름
    pub fn internal_queue(&self) -> String {
        format!("{}-queue-internal", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl Borrow<str> for UnitId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for UnitId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// 유닛 ID 문자 집합 검사 (`[A-Za-z0-9._-]+`)
pub fn is_valid_unit_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// 유닛의 출력 목적지
///
/// TOML/JSON 표현: 생략(종단), 문자열(기본 목적지), 테이블(라우팅 키 → 유닛 ID).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destinations {
    /// 종단 유닛 (출력 없음)
    #[default]
    None,
    /// 단일 기본 목적지
    Default(UnitId),
    /// 라우팅 키별 목적지
    Routed(BTreeMap<String, UnitId>),
}

impl Destinations {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// `(라우팅 키, 대상)` 쌍을 라우팅 키 순으로 반환합니다.
    ///
    /// 기본 목적지는 와일드카드 키 `"*"`로 표현됩니다.
    pub fn routes(&self) -> Vec<(String, UnitId)> {
        match self {
            Self::None => Vec::new(),
            Self::Default(target) => vec![(DEFAULT_ROUTING_KEY.to_owned(), target.clone())],
            Self::Routed(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// 사용자가 선언한 처리 유닛
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// 유닛 ID. 문서에서는 테이블 키로 주어지므로 직렬화하지 않습니다.
    #[serde(default, skip_serializing)]
    pub id: UnitId,

    /// 그룹 태그 (`Collector`, `Parser`, `Expert`, `Output` 또는 사용자 정의)
    pub group: String,

    /// 실행할 워커 모듈 참조
    pub module: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Destinations::is_none")]
    pub destinations: Destinations,

    /// 실행 주기 제한 (초). 0이면 제한 없음, 생략하면 기본값 상속
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,

    /// `false`면 유닛은 Disabled 상태로 시작합니다.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl UnitSpec {
    pub fn new(id: impl Into<UnitId>, group: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
            module: module.into(),
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_destinations(mut self, destinations: Destinations) -> Self {
        self.destinations = destinations;
        self
    }

    pub fn with_rate_limit(mut self, secs: u64) -> Self {
        self.rate_limit = Some(secs);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// 파이프라인 구성 문서
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// `true`면 순환 경로를 허용합니다.
    #[serde(default)]
    pub allow_cycles: bool,

    #[serde(default)]
    pub defaults: DefaultsLayer,

    #[serde(default)]
    pub units: BTreeMap<UnitId, UnitSpec>,
}

impl PipelineConfig {
    /// TOML 파일에서 구성 문서를 로드합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IronbotError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IronbotError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                IronbotError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), units = config.units.len(), "pipeline config loaded");
        Ok(config)
    }

    /// TOML 문자열에서 구성 문서를 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;
        config.normalize()?;
        Ok(config)
    }

    /// 테이블 키를 각 유닛의 `id`에 채워 넣습니다.
    ///
    /// 본문에 다른 `id`가 있으면 거부합니다. JSON 본문을 직접 역직렬화한 경우에도 호출해야 합니다.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        for (key, spec) in &mut self.units {
            if spec.id.as_str().is_empty() {
                spec.id = key.clone();
            } else if spec.id != *key {
                return Err(ConfigError::InvalidValue {
                    field: format!("units.{key}.id"),
                    reason: format!("id '{}' does not match table key", spec.id),
                });
            }
        }
        Ok(())
    }

    /// TOML 문자열로 직렬화합니다.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed {
            reason: format!("serialize failed: {e}"),
        })
    }

    /// 임시 파일에 쓴 뒤 rename하여 원자적으로 저장합니다.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let body = self.to_toml_string()?;
        let write_failed = |e: std::io::Error| ConfigError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, body).await.map_err(write_failed)?;
        tokio::fs::rename(&tmp, path).await.map_err(write_failed)?;
        debug!(path = %path.display(), "pipeline config saved");
        Ok(())
    }

    /// 유닛을 추가하거나 같은 ID의 유닛을 교체합니다.
    pub fn upsert_unit(&mut self, spec: UnitSpec) -> Option<UnitSpec> {
        self.units.insert(spec.id.clone(), spec)
    }

    pub fn remove_unit(&mut self, id: &str) -> Option<UnitSpec> {
        self.units.remove(id)
    }

    pub fn unit(&self, id: &str) -> Option<&UnitSpec> {
        self.units.get(id)
    }
}
