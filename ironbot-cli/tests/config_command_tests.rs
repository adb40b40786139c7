//! Integration tests for `ironbot config` command.
//!
//! Tests config validation and display functionality with real TOML files.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use ironbot_cli::commands::config::{show, validate};
use ironbot_cli::commands::load_config;

const PIPELINE: &str = r#"
[units.feed]
group = "Collector"
module = "/opt/bots/feed"
destinations = "sink"

[units.sink]
group = "Output"
module = "/opt/bots/sink"
"#;

fn write_config(dir: &Path, pipeline: &Path) -> std::path::PathBuf {
    let config_path = dir.join("ironbot.toml");
    let config = format!(
        r#"
[general]
log_level = "debug"
state_dir = '{state}'
log_dir = '{logs}'
pipeline_path = '{pipeline}'

[supervisor]
stop_grace_secs = 3
"#,
        state = dir.join("state").display(),
        logs = dir.join("logs").display(),
        pipeline = pipeline.display(),
    );
    fs::write(&config_path, config).expect("should write config");
    config_path
}

#[tokio::test]
async fn test_config_validate_valid_files() {
    // Given: A valid config pointing at a valid pipeline
    let temp_dir = TempDir::new().expect("should create temp dir");
    let pipeline = temp_dir.path().join("pipeline.toml");
    fs::write(&pipeline, PIPELINE).expect("should write pipeline");
    let config_path = write_config(temp_dir.path(), &pipeline);

    // When: Validating
    let report = validate(Some(&config_path), None).await;

    // Then: Both files are accepted
    assert!(report.valid, "errors: {:?}", report.errors);
    assert_eq!(report.source, config_path.display().to_string());
    assert_eq!(report.pipeline, Some(pipeline.display().to_string()));
}

#[tokio::test]
async fn test_config_validate_reports_pipeline_errors() {
    // Given: A pipeline where a unit routes to itself and another to a ghost
    let temp_dir = TempDir::new().expect("should create temp dir");
    let pipeline = temp_dir.path().join("pipeline.toml");
    fs::write(
        &pipeline,
        r#"
[units.feed]
group = "Collector"
module = "/opt/bots/feed"
destinations = "feed"

[units.sink]
group = "Output"
module = "/opt/bots/sink"
destinations = "ghost"
"#,
    )
    .expect("should write pipeline");
    let config_path = write_config(temp_dir.path(), &pipeline);

    // When: Validating
    let report = validate(Some(&config_path), None).await;

    // Then: Every resolution error is listed
    assert!(!report.valid);
    assert!(report.errors.len() >= 2, "errors: {:?}", report.errors);
}

#[tokio::test]
async fn test_config_validate_pipeline_override() {
    // Given: A config whose pipeline_path is missing, and an explicit override
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = write_config(temp_dir.path(), &temp_dir.path().join("missing.toml"));
    let other = temp_dir.path().join("other.toml");
    fs::write(&other, PIPELINE).expect("should write pipeline");

    // When: Validating with and without the override
    let without = validate(Some(&config_path), None).await;
    let with = validate(Some(&config_path), Some(&other)).await;

    // Then: Only the override resolves
    assert!(!without.valid, "missing pipeline should be invalid");
    assert!(with.valid, "errors: {:?}", with.errors);
}

#[tokio::test]
async fn test_config_validate_malformed_toml() {
    // Given: A malformed TOML file
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("bad.toml");
    fs::write(&config_path, "[general\nlog_level = \"info\"\n").expect("should write bad config");

    // When: Validating
    let report = validate(Some(&config_path), None).await;

    // Then: The config error is reported and the pipeline is never looked at
    assert!(!report.valid);
    assert!(report.pipeline.is_none());
    assert_eq!(report.errors.len(), 1);
}

#[tokio::test]
async fn test_config_validate_missing_file() {
    // Given: A nonexistent file path
    let config_path = Path::new("/nonexistent/ironbot.toml");

    // When: Loading the config
    let result = load_config(Some(config_path)).await;

    // Then: Should fail with a config exit code
    let err = result.expect_err("missing file should fail to load");
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_config_show_uses_file_values() {
    // Given: A config file with a custom grace period
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = write_config(temp_dir.path(), &temp_dir.path().join("pipeline.toml"));
    let (config, source) = load_config(Some(&config_path))
        .await
        .expect("config loads");

    // When: Showing the supervisor section
    let report = show(&config, source, Some("supervisor".to_owned())).expect("serializes");

    // Then: The file value wins over the default
    assert!(report.config_toml.contains("stop_grace_secs = 3"));
    assert_eq!(report.section.as_deref(), Some("supervisor"));
}
