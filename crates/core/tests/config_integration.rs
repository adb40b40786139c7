//! ironbot.toml / pipeline.toml 통합 설정 테스트
//!
//! - 예제 설정 파일 파싱 테스트
//! - 부분 설정 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 빈 파일 / 잘못된 형식 에러 테스트

use ironbot_core::config::IronbotConfig;
use ironbot_core::defaults::merge;
use ironbot_core::error::{ConfigError, IronbotError};
use ironbot_core::unit::{Destinations, PipelineConfig, UnitId};
use serial_test::serial;

// =============================================================================
// 예제 파일 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let content = include_str!("../../../ironbot.toml.example");
    let config = IronbotConfig::parse(content).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.state_dir, "/var/lib/ironbot/state");
    assert_eq!(config.general.pid_file, "/var/run/ironbot/ironbot.pid");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_matches_code_defaults() {
    let content = include_str!("../../../ironbot.toml.example");
    let parsed = IronbotConfig::parse(content).expect("should parse");
    let defaults = IronbotConfig::default();

    assert_eq!(parsed.general.log_dir, defaults.general.log_dir);
    assert_eq!(parsed.general.pipeline_path, defaults.general.pipeline_path);
    assert_eq!(
        parsed.supervisor.stop_grace_secs,
        defaults.supervisor.stop_grace_secs
    );
    assert_eq!(
        parsed.supervisor.startup_probe_ms,
        defaults.supervisor.startup_probe_ms
    );
    assert_eq!(parsed.api.port, defaults.api.port);
    assert_eq!(parsed.metrics.port, defaults.metrics.port);
}

#[test]
fn example_pipeline_parses_and_merges() {
    let content = include_str!("../../../pipeline.toml.example");
    let config = PipelineConfig::parse(content).expect("example pipeline should parse");

    assert_eq!(config.units.len(), 5);
    let dedup = config.unit("deduplicator").expect("deduplicator present");
    assert!(matches!(dedup.destinations, Destinations::Routed(_)));

    // Collector 그룹 기본값 상속
    let collector = config.unit("feodo-collector").expect("collector present");
    let effective = merge(&config.defaults, collector).expect("merge");
    assert_eq!(effective.rate_limit, 3600);
    assert_eq!(effective.parameters["broker"], "redis");

    // Output 그룹의 중첩 객체는 전역 값과 깊게 병합됨
    let output = config.unit("file-output").expect("output present");
    let effective = merge(&config.defaults, output).expect("merge");
    assert_eq!(effective.parameters["redis"]["host"], "127.0.0.1");
    assert_eq!(effective.parameters["redis"]["db"], 2);
    assert_eq!(effective.rate_limit, 0);

    assert!(!config.unit("dropped-output").expect("present").enabled);
}

#[test]
fn example_pipeline_ids_follow_table_keys() {
    let content = include_str!("../../../pipeline.toml.example");
    let config = PipelineConfig::parse(content).expect("should parse");
    for (key, spec) in &config.units {
        assert_eq!(key, &spec.id);
        assert!(spec.id.is_valid(), "example id {} must be valid", spec.id);
    }
    assert_eq!(
        config.unit("feodo-collector").map(|u| u.destinations.clone()),
        Some(Destinations::Default(UnitId::from("feodo-parser")))
    );
}

// =============================================================================
// 부분 설정
// =============================================================================

#[test]
fn partial_config_api_only() {
    let toml = r#"
[api]
listen_addr = "0.0.0.0"
port = 9000
"#;
    let config = IronbotConfig::parse(toml).expect("should parse");
    assert_eq!(config.api.listen_addr, "0.0.0.0");
    assert_eq!(config.api.port, 9000);
    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.supervisor.max_concurrent_ops, 8);
}

#[test]
fn unknown_section_is_ignored() {
    let toml = r#"
[general]
log_level = "warn"

[future_section]
key = "value"
"#;
    let config = IronbotConfig::parse(toml).expect("unknown sections are ignored");
    assert_eq!(config.general.log_level, "warn");
}

// =============================================================================
// 환경변수 우선순위
// =============================================================================

#[tokio::test]
#[serial]
async fn env_override_takes_precedence_over_toml() {
    // Given: 파일에는 info, 환경변수에는 debug
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ironbot.toml");
    std::fs::write(&path, "[general]\nlog_level = \"info\"\n").expect("write");

    // SAFETY: serial 테스트이므로 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var("IRONBOT_GENERAL_LOG_LEVEL", "debug") };

    // When
    let result = IronbotConfig::load(&path).await;
    unsafe { std::env::remove_var("IRONBOT_GENERAL_LOG_LEVEL") };

    // Then
    let config = result.expect("should load");
    assert_eq!(config.general.log_level, "debug");
}

#[tokio::test]
#[serial]
async fn env_override_is_validated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ironbot.toml");
    std::fs::write(&path, "").expect("write");

    // SAFETY: serial 테스트이므로 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var("IRONBOT_SUPERVISOR_MAX_CONCURRENT_OPS", "0") };
    let result = IronbotConfig::load(&path).await;
    unsafe { std::env::remove_var("IRONBOT_SUPERVISOR_MAX_CONCURRENT_OPS") };

    let err = result.expect_err("zero concurrency must be rejected");
    assert!(err.to_string().contains("max_concurrent_ops"));
}

// =============================================================================
// 에러 케이스
// =============================================================================

#[test]
fn malformed_toml_returns_parse_error() {
    let err = IronbotConfig::parse("[general\nlog_level = ").expect_err("should fail");
    assert!(matches!(
        err,
        IronbotError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn wrong_type_for_numeric_field() {
    let toml = r#"
[supervisor]
stop_grace_secs = "soon"
"#;
    let err = IronbotConfig::parse(toml).expect_err("string for u64 must fail");
    assert!(matches!(
        err,
        IronbotError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn pipeline_unit_missing_module_is_parse_error() {
    let toml = r#"
[units.a]
group = "Collector"
"#;
    let err = PipelineConfig::parse(toml).expect_err("module is required");
    assert!(err.to_string().contains("module"));
}

#[tokio::test]
async fn from_file_nonexistent_returns_file_not_found() {
    let err = IronbotConfig::from_file("/nonexistent/ironbot.toml")
        .await
        .expect_err("should fail");
    assert!(matches!(
        err,
        IronbotError::Config(ConfigError::FileNotFound { .. })
    ));
}
