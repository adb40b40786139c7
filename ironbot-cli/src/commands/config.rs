//! `ironbot config` command handler

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use ironbot_core::config::IronbotConfig;
use ironbot_core::unit::PipelineConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::commands::load_config;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Sections accepted by `config show --section`.
const SECTIONS: [&str; 4] = ["general", "supervisor", "api", "metrics"];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: Option<&Path>,
    pipeline_path: Option<&Path>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, pipeline_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Validate `ironbot.toml` and, when it loads, the pipeline document it points at.
///
/// # Errors
///
/// Returns `CliError::Config` if either file is invalid. The report is printed first.
async fn execute_validate(
    config_path: Option<&Path>,
    pipeline_path: Option<&Path>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let report = validate(config_path, pipeline_path).await;
    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

/// Build the validation report without printing it.
pub async fn validate(config_path: Option<&Path>, pipeline_path: Option<&Path>) -> ConfigValidationReport {
    let (config, source) = match load_config(config_path).await {
        Ok(loaded) => loaded,
        Err(e) => {
            return ConfigValidationReport {
                source: describe(config_path),
                pipeline: None,
                valid: false,
                errors: vec![e.to_string()],
            };
        }
    };

    let pipeline = pipeline_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.general.pipeline_path));
    info!(config = %source, pipeline = %pipeline.display(), "validating configuration");

    let errors = match PipelineConfig::load(&pipeline).await {
        Ok(document) => match ironbot_topology::resolve(&document) {
            Ok(_) => Vec::new(),
            Err(errors) => errors.iter().map(ToString::to_string).collect(),
        },
        Err(e) => vec![e.to_string()],
    };

    ConfigValidationReport {
        source,
        pipeline: Some(pipeline.display().to_string()),
        valid: errors.is_empty(),
        errors,
    }
}

/// Show the effective configuration (file + env overrides + defaults).
///
/// # Errors
///
/// Returns `CliError::Command` for an unknown section name.
async fn execute_show(
    config_path: Option<&Path>,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let (config, source) = load_config(config_path).await?;
    let report = show(&config, source, section)?;
    writer.render(&report)?;
    Ok(())
}

/// Serialize the requested part of `config`.
pub fn show(
    config: &IronbotConfig,
    source: String,
    section: Option<String>,
) -> Result<ConfigReport, CliError> {
    let config_toml = match section.as_deref() {
        None => toml::to_string_pretty(config),
        Some("general") => toml::to_string_pretty(&config.general),
        Some("supervisor") => toml::to_string_pretty(&config.supervisor),
        Some("api") => toml::to_string_pretty(&config.api),
        Some("metrics") => toml::to_string_pretty(&config.metrics),
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section: {} (expected: {})",
                other,
                SECTIONS.join(", ")
            )));
        }
    }
    .map_err(|e| CliError::Command(format!("failed to serialize configuration: {e}")))?;

    Ok(ConfigReport {
        source,
        section,
        config_toml,
    })
}

fn describe(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| super::DEFAULT_CONFIG_PATH.to_owned())
}

/// Configuration display report.
///
/// `config_toml` is only used for text rendering.
#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if let Some(ref section) = self.section {
            let section_label = format!("[{}]", section);
            writeln!(
                w,
                "Configuration {} (source: {})",
                section_label.bold(),
                self.source
            )?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.config_toml)?;
        Ok(())
    }
}

/// Configuration validation report.
#[derive(Debug, Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;
        if let Some(pipeline) = &self.pipeline {
            writeln!(w, "  Pipeline: {}", pipeline)?;
        }

        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(payload: &impl Render) -> String {
        colored::control::set_override(false);
        let mut buffer = Vec::new();
        payload
            .render_text(&mut buffer)
            .expect("text rendering should succeed");
        String::from_utf8(buffer).expect("valid UTF-8")
    }

    #[test]
    fn test_show_full_config_contains_every_section() {
        let report = show(&IronbotConfig::default(), "built-in defaults".to_owned(), None)
            .expect("serializes");

        for section in SECTIONS {
            assert!(
                report.config_toml.contains(&format!("[{section}]")),
                "missing [{section}]"
            );
        }
        let text = render(&report);
        assert!(text.contains("source: built-in defaults"));
    }

    #[test]
    fn test_show_single_section() {
        let report = show(
            &IronbotConfig::default(),
            "ironbot.toml".to_owned(),
            Some("supervisor".to_owned()),
        )
        .expect("serializes");

        assert!(report.config_toml.contains("stop_grace_secs"));
        assert!(!report.config_toml.contains("pipeline_path"));
        assert!(render(&report).contains("Configuration [supervisor]"));
    }

    #[test]
    fn test_show_unknown_section_is_command_error() {
        let err = show(
            &IronbotConfig::default(),
            "ironbot.toml".to_owned(),
            Some("ebpf".to_owned()),
        )
        .expect_err("unknown section");

        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("general, supervisor, api, metrics"));
    }

    #[test]
    fn test_validation_report_json_skips_toml_body() {
        let report = ConfigReport {
            source: "ironbot.toml".to_owned(),
            section: None,
            config_toml: "[general]".to_owned(),
        };
        let json = serde_json::to_value(&report).expect("json");
        assert!(json.get("config_toml").is_none());
        assert!(json.get("section").is_none());
    }

    #[test]
    fn test_validation_report_lists_errors() {
        let report = ConfigValidationReport {
            source: "ironbot.toml".to_owned(),
            pipeline: Some("pipeline.toml".to_owned()),
            valid: false,
            errors: vec!["unit 'a' routes to itself".to_owned()],
        };
        let text = render(&report);
        assert!(text.contains("INVALID"));
        assert!(text.contains("Pipeline: pipeline.toml"));
        assert!(text.contains("Error: unit 'a' routes to itself"));
    }
}
