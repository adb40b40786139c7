//! Read-only pipeline commands: `plan`, `check`, `units`, `queues`
//!
//! These resolve the pipeline document directly and never touch the state directory.

use std::io::Write;
use std::path::Path;

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use ironbot_control::{QueueKind, Target};
use ironbot_core::error::ResolutionError;
use ironbot_core::unit::PipelineConfig;
use ironbot_topology::{PipelinePlan, ResolvedUnit};

use crate::cli::{CheckArgs, QueuesArgs, TargetArgs};
use crate::commands::Context;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute `plan`.
pub async fn execute_plan(ctx: &Context, writer: &OutputWriter) -> Result<(), CliError> {
    let plan = resolve_or_report(&ctx.pipeline_path, writer).await?;
    writer.render(&PlanView(plan))?;
    Ok(())
}

/// Execute `check [FILE]`.
pub async fn execute_check(
    args: &CheckArgs,
    ctx: &Context,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let path = args.file.as_deref().unwrap_or(ctx.pipeline_path.as_path());
    let plan = resolve_or_report(path, writer).await?;
    writer.render(&CheckReport::valid(path, &plan))?;
    Ok(())
}

/// Execute `units [TARGET]`.
pub async fn execute_units(
    args: &TargetArgs,
    ctx: &Context,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let plan = resolve_or_report(&ctx.pipeline_path, writer).await?;
    let ids = plan.units_in(&Target::parse(&args.target))?;
    let units = ids
        .iter()
        .filter_map(|id| plan.unit(id.as_str()).cloned())
        .collect();
    writer.render(&UnitList { units })?;
    Ok(())
}

/// Execute `queues [KIND]`.
pub async fn execute_queues(
    args: &QueuesArgs,
    ctx: &Context,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let plan = resolve_or_report(&ctx.pipeline_path, writer).await?;
    writer.render(&QueueList {
        kind: args.kind,
        queues: plan.queues(args.kind),
    })?;
    Ok(())
}

/// Resolve a pipeline document. On resolution errors, print all of them and fail.
pub async fn resolve_or_report(path: &Path, writer: &OutputWriter) -> Result<PipelinePlan, CliError> {
    info!(path = %path.display(), "resolving pipeline");
    let config = PipelineConfig::load(path).await?;
    match ironbot_topology::resolve(&config) {
        Ok(plan) => Ok(plan),
        Err(errors) => {
            let count = errors.len();
            writer.render(&CheckReport::invalid(path, errors))?;
            Err(CliError::InvalidPipeline(count))
        }
    }
}

// ---- payloads ----

/// Outcome of resolving a document without applying it.
#[derive(Serialize)]
pub struct CheckReport {
    pub source: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub units: usize,
    pub queues: usize,
    pub errors: Vec<ResolutionError>,
}

impl CheckReport {
    fn valid(path: &Path, plan: &PipelinePlan) -> Self {
        Self {
            source: path.display().to_string(),
            valid: true,
            fingerprint: Some(plan.fingerprint().to_owned()),
            units: plan.len(),
            queues: plan.queues(QueueKind::All).len(),
            errors: Vec::new(),
        }
    }

    fn invalid(path: &Path, errors: Vec<ResolutionError>) -> Self {
        Self {
            source: path.display().to_string(),
            valid: false,
            fingerprint: None,
            units: 0,
            queues: 0,
            errors,
        }
    }
}

impl Render for CheckReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.valid {
            writeln!(
                w,
                "{} {}: {} unit(s), {} queue(s)",
                "ok".green().bold(),
                self.source,
                self.units,
                self.queues
            )?;
            if let Some(fingerprint) = &self.fingerprint {
                writeln!(w, "fingerprint {}", fingerprint.dimmed())?;
            }
            return Ok(());
        }

        writeln!(
            w,
            "{} {}: {} error(s)",
            "invalid".red().bold(),
            self.source,
            self.errors.len()
        )?;
        for error in &self.errors {
            writeln!(w, "  {} {}", "-".red(), error)?;
        }
        Ok(())
    }
}

/// The full resolved plan.
#[derive(Serialize)]
#[serde(transparent)]
pub struct PlanView(pub PipelinePlan);

impl Render for PlanView {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let plan = &self.0;
        writeln!(
            w,
            "{} unit(s), fingerprint {}",
            plan.len(),
            plan.fingerprint().dimmed()
        )?;
        for unit in plan.units() {
            writeln!(w)?;
            render_unit_header(w, unit)?;
            writeln!(w, "  source   {}", unit.source_queue)?;
            writeln!(w, "  internal {}", unit.internal_queue)?;
            for edge in &unit.edges {
                writeln!(
                    w,
                    "  {:<8} -> {} ({})",
                    edge.routing_key, edge.target, edge.queue
                )?;
            }
        }
        Ok(())
    }
}

fn render_unit_header(w: &mut dyn Write, unit: &ResolvedUnit) -> std::io::Result<()> {
    let name = if unit.enabled {
        unit.id.to_string().bold()
    } else {
        format!("{} (disabled)", unit.id).dimmed()
    };
    write!(w, "{} [{}] {}", name, unit.group, unit.module)?;
    if unit.rate_limit > 0 {
        write!(w, " every {}s", unit.rate_limit)?;
    }
    writeln!(w)
}

/// Units selected by a target.
#[derive(Serialize)]
pub struct UnitList {
    pub units: Vec<ResolvedUnit>,
}

impl Render for UnitList {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "{:<28} {:<12} {:<8} Destinations", "Unit", "Group", "Enabled")?;
        writeln!(w, "{}", "-".repeat(72))?;
        for unit in &self.units {
            let destinations = unit
                .edges
                .iter()
                .map(|e| format!("{}={}", e.routing_key, e.target))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                w,
                "{:<28} {:<12} {:<8} {}",
                unit.id,
                unit.group,
                if unit.enabled { "yes" } else { "no" },
                if destinations.is_empty() { "-".to_owned() } else { destinations }
            )?;
        }
        Ok(())
    }
}

/// Derived queue names.
#[derive(Serialize)]
pub struct QueueList {
    pub kind: QueueKind,
    pub queues: Vec<String>,
}

impl Render for QueueList {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for queue in &self.queues {
            writeln!(w, "{queue}")?;
        }
        Ok(())
    }
}
