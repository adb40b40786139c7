//! 설정 관리: ironbot.toml 파싱 및 런타임 설정
//!
//! [`IronbotConfig`]는 데몬과 CLI가 공유하는 최상위 설정 구조체입니다.
//! 파이프라인 구성 자체는 [`PipelineConfig`](crate::unit::PipelineConfig)가 담당합니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`IRONBOT_SUPERVISOR_STOP_GRACE_SECS=5` 형식)
//! 3. 설정 파일 (`ironbot.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), ironbot_core::error::IronbotError> {
//! use ironbot_core::config::IronbotConfig;
//!
//! let config = IronbotConfig::load("ironbot.toml").await?;
//! let config = IronbotConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, IronbotError};

/// Ironbot 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IronbotConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 프로세스 감독 설정
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// HTTP 관리 API 설정
    #[serde(default)]
    pub api: ApiConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl IronbotConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IronbotError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, IronbotError> {
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
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, IronbotError> {
        toml::from_str(toml_str).map_err(|e| {
            IronbotError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `IRONBOT_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "IRONBOT_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "IRONBOT_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.state_dir, "IRONBOT_GENERAL_STATE_DIR");
        override_string(&mut self.general.log_dir, "IRONBOT_GENERAL_LOG_DIR");
        override_string(&mut self.general.pid_file, "IRONBOT_GENERAL_PID_FILE");
        override_string(
            &mut self.general.pipeline_path,
            "IRONBOT_GENERAL_PIPELINE_PATH",
        );

        // Supervisor
        override_u64(
            &mut self.supervisor.stop_grace_secs,
            "IRONBOT_SUPERVISOR_STOP_GRACE_SECS",
        );
        override_u64(
            &mut self.supervisor.startup_probe_ms,
            "IRONBOT_SUPERVISOR_STARTUP_PROBE_MS",
        );
        override_usize(
            &mut self.supervisor.max_concurrent_ops,
            "IRONBOT_SUPERVISOR_MAX_CONCURRENT_OPS",
        );
        override_u64(
            &mut self.supervisor.liveness_interval_secs,
            "IRONBOT_SUPERVISOR_LIVENESS_INTERVAL_SECS",
        );

        // API
        override_bool(&mut self.api.enabled, "IRONBOT_API_ENABLED");
        override_string(&mut self.api.listen_addr, "IRONBOT_API_LISTEN_ADDR");
        override_u16(&mut self.api.port, "IRONBOT_API_PORT");

        // Metrics
        override_bool(&mut self.metrics.enabled, "IRONBOT_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "IRONBOT_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "IRONBOT_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IronbotError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.general.state_dir.is_empty() {
            return Err(invalid("general.state_dir", "must not be empty"));
        }

        if self.supervisor.stop_grace_secs == 0 {
            return Err(invalid("supervisor.stop_grace_secs", "must be at least 1"));
        }

        if self.supervisor.max_concurrent_ops == 0 {
            return Err(invalid("supervisor.max_concurrent_ops", "must be at least 1"));
        }

        if self.supervisor.liveness_interval_secs == 0 {
            return Err(invalid(
                "supervisor.liveness_interval_secs",
                "must be at least 1",
            ));
        }

        if self.api.enabled && self.api.port == 0 {
            return Err(invalid("api.port", "must not be 0 when the API is enabled"));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid(
                "metrics.port",
                "must not be 0 when metrics are enabled",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> IronbotError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty, compact)
    pub log_format: String,
    /// 유닛 상태 레코드 디렉토리
    pub state_dir: String,
    /// 워커 stdout/stderr 디렉토리. 비어 있으면 출력을 버립니다.
    pub log_dir: String,
    /// 데몬 PID 파일 경로
    pub pid_file: String,
    /// 파이프라인 구성 문서 경로
    pub pipeline_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            state_dir: "/var/lib/ironbot/state".to_owned(),
            log_dir: "/var/log/ironbot".to_owned(),
            pid_file: "/var/run/ironbot/ironbot.pid".to_owned(),
            pipeline_path: "/etc/ironbot/pipeline.toml".to_owned(),
        }
    }
}

/// 프로세스 감독 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// SIGTERM 후 SIGKILL까지 대기 시간 (초)
    pub stop_grace_secs: u64,
    /// 시작 직후 종료 여부를 확인하는 대기 시간 (밀리초)
    pub startup_probe_ms: u64,
    /// 동시에 실행되는 제어 작업 수 상한
    pub max_concurrent_ops: usize,
    /// 데몬의 생존 확인 주기 (초)
    pub liveness_interval_secs: u64,
}

impl SupervisorConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn startup_probe(&self) -> Duration {
        Duration::from_millis(self.startup_probe_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: 2,
            startup_probe_ms: 200,
            max_concurrent_ops: 8,
            liveness_interval_secs: 5,
        }
    }
}

/// HTTP 관리 API 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 8470,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
    /// 스크레이프 경로. exporter는 `/metrics`만 제공합니다.
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9470,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = IronbotConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.supervisor.stop_grace_secs, 2);
        assert_eq!(config.supervisor.startup_probe_ms, 200);
        assert_eq!(config.supervisor.max_concurrent_ops, 8);
        assert!(config.api.enabled);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        IronbotConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = IronbotConfig::parse("").unwrap();
        assert_eq!(config.general.state_dir, "/var/lib/ironbot/state");
        assert_eq!(config.api.port, 8470);
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[general]
log_level = "debug"
state_dir = "/tmp/ironbot"

[supervisor]
stop_grace_secs = 10
"#;
        let config = IronbotConfig::parse(toml).unwrap();
        assert_eq!(config.general.log_level, "debug");
        // log_format은 기본값 유지
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.general.state_dir, "/tmp/ironbot");
        assert_eq!(config.supervisor.stop_grace(), Duration::from_secs(10));
        assert_eq!(config.supervisor.startup_probe(), Duration::from_millis(200));
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = IronbotConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            IronbotError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = IronbotConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let mut config = IronbotConfig::default();
        config.general.log_format = "xml".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }

    #[test]
    fn validate_rejects_zero_grace() {
        let mut config = IronbotConfig::default();
        config.supervisor.stop_grace_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stop_grace_secs"));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = IronbotConfig::default();
        config.supervisor.max_concurrent_ops = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_ops"));
    }

    #[test]
    fn validate_ignores_port_when_api_disabled() {
        let mut config = IronbotConfig::default();
        config.api.enabled = false;
        config.api.port = 0;
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn env_override_applies_to_sections() {
        // SAFETY: serial 테스트이므로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
        unsafe {
            std::env::set_var("IRONBOT_SUPERVISOR_STOP_GRACE_SECS", "7");
            std::env::set_var("IRONBOT_API_ENABLED", "false");
            std::env::set_var("IRONBOT_GENERAL_STATE_DIR", "/srv/state");
        }
        let mut config = IronbotConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("IRONBOT_SUPERVISOR_STOP_GRACE_SECS");
            std::env::remove_var("IRONBOT_API_ENABLED");
            std::env::remove_var("IRONBOT_GENERAL_STATE_DIR");
        }

        assert_eq!(config.supervisor.stop_grace_secs, 7);
        assert!(!config.api.enabled);
        assert_eq!(config.general.state_dir, "/srv/state");
    }

    #[test]
    #[serial]
    fn env_override_invalid_number_keeps_original() {
        let mut val = 8usize;
        // SAFETY: serial 테스트이므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("TEST_IRONBOT_USIZE_BAD", "many") };
        override_usize(&mut val, "TEST_IRONBOT_USIZE_BAD");
        assert_eq!(val, 8); // 원래 값 유지
        unsafe { std::env::remove_var("TEST_IRONBOT_USIZE_BAD") };
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_IRONBOT_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = IronbotConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = IronbotConfig::parse(&toml_str).unwrap();
        assert_eq!(config.general.pid_file, parsed.general.pid_file);
        assert_eq!(
            config.supervisor.liveness_interval_secs,
            parsed.supervisor.liveness_interval_secs
        );
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = IronbotConfig::from_file("/nonexistent/path/ironbot.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IronbotError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
