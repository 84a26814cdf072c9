//! CLI output formatting

use crate::{
    core::{RunStatus, RunSummary, Step, StepStatus},
    execution::ExecutionEvent,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use uuid::Uuid;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar counting steps
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(bar_style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

pub fn format_run_status(status: RunStatus) -> String {
    match status {
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Finished => style("FINISHED").green().to_string(),
        RunStatus::Errored => style("ERRORED").red().to_string(),
        RunStatus::Stopped => style("STOPPED").blue().to_string(),
    }
}

pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::Pending => style("PENDING").dim().to_string(),
        StepStatus::Running => style("RUNNING").yellow().to_string(),
        StepStatus::Processed => style("PROCESSED").green().to_string(),
        StepStatus::Errored => style("ERRORED").red().to_string(),
    }
}

/// One history line per run
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.run.status {
        RunStatus::Finished => CHECK,
        RunStatus::Errored => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Stopped => INFO,
    };

    format!(
        "{} {} - {} - {} ({}/{}) - {}",
        status_icon,
        style(summary.run.id).dim(),
        summary.run.created_at.format("%Y-%m-%d %H:%M:%S"),
        format_run_status(summary.run.status),
        summary.processed_steps,
        summary.total_steps,
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan()
    )
}

pub fn format_step(step: &Step) -> String {
    format!(
        "  {:>2}. {} [{}/{}] {}",
        step.position + 1,
        style(step.name()).bold(),
        step.config.step_type,
        step.config.method,
        format_step_status(step.status)
    )
}

/// Format an execution event for display
pub fn format_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted { run_id, steps } => format!(
            "{} Starting run {} ({} steps)",
            ROCKET,
            style(short_id(run_id)).dim(),
            steps
        ),
        ExecutionEvent::InputLoaded { nodes, .. } => {
            format!("{} Loaded {} input nodes", INFO, style(nodes).bold())
        }
        ExecutionEvent::RunResumed {
            run_id,
            step,
            position,
        } => format!(
            "{} Resuming run {} at step {} ({})",
            ROCKET,
            style(short_id(run_id)).dim(),
            position + 1,
            style(step).cyan()
        ),
        ExecutionEvent::StepStarted {
            step,
            position,
            total,
            pending,
            processed,
        } => {
            if *processed > 0 {
                format!(
                    "{} [{}/{}] {} ({} pending, {} already processed)",
                    SPINNER,
                    position + 1,
                    total,
                    style(step).cyan(),
                    pending,
                    processed
                )
            } else {
                format!(
                    "{} [{}/{}] {} ({} nodes)",
                    SPINNER,
                    position + 1,
                    total,
                    style(step).cyan(),
                    pending
                )
            }
        }
        ExecutionEvent::CacheHit { step } => {
            format!("{} {} (cached)", INFO, style(step).dim())
        }
        ExecutionEvent::StepCompleted { step, outputs } => {
            format!("{} {} → {} nodes", CHECK, style(step).green(), outputs)
        }
        ExecutionEvent::StepFailed { step, error } => {
            format!("{} {}: {}", CROSS, style(step).red(), style(error).dim())
        }
        ExecutionEvent::RunFinished { run_id, outputs } => format!(
            "{} Run {} {} with {} nodes",
            CHECK,
            style(short_id(run_id)).dim(),
            style("finished").green(),
            outputs
        ),
        ExecutionEvent::RunStopped { run_id } => format!(
            "{} Run {} stopped; resume it with `nodeline generate --resume {}`",
            WARN,
            style(short_id(run_id)).dim(),
            run_id
        ),
    }
}

/// Whether an event moves the step progress bar forward
pub fn completes_step(event: &ExecutionEvent) -> bool {
    matches!(event, ExecutionEvent::StepCompleted { .. })
}
