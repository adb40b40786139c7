//! Unit operations: `start`, `stop`, `restart`, `reload`, `force-run`, `status`,
//! `enable`, `disable`, `remove`, `acquire-run`

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use colored::{ColoredString, Colorize};
use serde::Serialize;

use ironbot_control::{BatchReport, Operation, OutcomeResult, ResolveReport, Target};
use ironbot_core::unit::UnitId;
use ironbot_supervisor::{ProcessState, RunDecision, UnitStatus};

use crate::cli::{TargetArgs, UnitArgs};
use crate::commands::Context;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute a target-scoped operation.
///
/// The report is always printed; a report with failed units turns into a non-zero exit.
pub async fn execute(
    operation: Operation,
    args: &TargetArgs,
    ctx: &Context,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let controller = ctx.controller().await?;
    let target = Target::parse(&args.target);
    let report = controller.run(operation, &target).await?;

    writer.render(&report)?;

    if report.has_errors() {
        return Err(CliError::UnitsFailed {
            failed: report.failed(),
            total: report.outcomes.len(),
        });
    }
    Ok(())
}

/// Execute `remove <id>`.
pub async fn remove(args: &UnitArgs, ctx: &Context, writer: &OutputWriter) -> Result<(), CliError> {
    let controller = ctx.controller().await?;
    let report = controller.remove_unit(&UnitId::from(args.id.as_str())).await?;
    writer.render(&ApplyView(report))?;
    Ok(())
}

/// Execute `acquire-run <id>`.
pub async fn acquire_run(
    args: &UnitArgs,
    ctx: &Context,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let controller = ctx.controller().await?;
    let unit_id = UnitId::from(args.id.as_str());
    let decision = controller.acquire_run(&unit_id).await?;
    writer.render(&AcquireView { unit_id, decision })?;
    Ok(())
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn paint_state(state: ProcessState) -> ColoredString {
    let label = state.to_string();
    match state {
        ProcessState::Running => label.green(),
        ProcessState::Starting | ProcessState::Stopping => label.cyan(),
        ProcessState::Stopped => label.yellow(),
        ProcessState::Crashed => label.red().bold(),
        ProcessState::Disabled => label.dimmed(),
    }
}

fn status_line(status: &UnitStatus) -> String {
    let pid = status
        .pid
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_owned());
    let last_run = status
        .last_run_at
        .map(format_time)
        .unwrap_or_else(|| "-".to_owned());
    format!("{:<8} {}", pid, last_run)
}

impl Render for BatchReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "{:<28} {:<10} {:<8} Last run", "Unit", "State", "Pid")?;
        writeln!(w, "{}", "-".repeat(72))?;

        for outcome in &self.outcomes {
            match &outcome.result {
                OutcomeResult::Status(status) => {
                    writeln!(
                        w,
                        "{:<28} {} {}",
                        outcome.unit_id,
                        paint_padded(status.state, 10),
                        status_line(status)
                    )?;
                    if status.state == ProcessState::Crashed {
                        if let Some(code) = status.last_exit_code {
                            writeln!(w, "  {}", format!("last exit code {code}").dimmed())?;
                        }
                    }
                }
                OutcomeResult::Error(err) => {
                    writeln!(
                        w,
                        "{:<28} {} {}",
                        outcome.unit_id,
                        format!("{:<10}", "error").red().bold(),
                        format!("[{}] {}", err.kind, err.message).red()
                    )?;
                }
            }
        }

        let ok = self.outcomes.len() - self.failed();
        writeln!(w)?;
        writeln!(
            w,
            "{} {}: {}/{} ok",
            self.operation,
            self.target,
            ok,
            self.outcomes.len()
        )?;
        Ok(())
    }
}

/// Pad before colouring so escape codes do not count towards the column width.
fn paint_padded(state: ProcessState, width: usize) -> String {
    let label = state.to_string();
    let padding = " ".repeat(width.saturating_sub(label.len()));
    format!("{}{}", paint_state(state), padding)
}

/// Result of a pipeline change.
#[derive(Serialize)]
#[serde(transparent)]
pub struct ApplyView(pub ResolveReport);

impl Render for ApplyView {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let report = &self.0;
        writeln!(
            w,
            "{} {} unit(s), {} queue(s), fingerprint {}",
            (if report.applied { "applied" } else { "checked" }).green().bold(),
            report.units,
            report.queues,
            &report.fingerprint[..report.fingerprint.len().min(12)]
        )?;
        for id in &report.diff.added {
            writeln!(w, "  {} {}", "+".green(), id)?;
        }
        for id in &report.diff.removed {
            writeln!(w, "  {} {}", "-".red(), id)?;
        }
        for id in &report.diff.changed {
            writeln!(w, "  {} {}", "~".yellow(), id)?;
        }
        Ok(())
    }
}

/// Run permission for a worker loop.
#[derive(Serialize)]
pub struct AcquireView {
    pub unit_id: UnitId,
    #[serde(flatten)]
    pub decision: RunDecision,
}

impl Render for AcquireView {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        match self.decision {
            RunDecision::Proceed => writeln!(w, "{}: {}", self.unit_id, "proceed".green()),
            RunDecision::Throttled { until } => writeln!(
                w,
                "{}: {} until {}",
                self.unit_id,
                "throttled".yellow(),
                format_time(until)
            ),
        }
    }
}
