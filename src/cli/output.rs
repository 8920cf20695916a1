//! CLI output formatting

use crate::{
    core::{config::ResumeMode, ExecutionStatus, StepRecord},
    execution::ExecutionEvent,
    persistence::CheckpointEntry,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar over the step chain
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

pub fn format_resume_mode(mode: ResumeMode) -> String {
    match mode {
        ResumeMode::FreshStart => "fresh start".to_string(),
        ResumeMode::Continue => "continue".to_string(),
        ResumeMode::FromIteration(k) => format!("restart at iteration {}", k),
        ResumeMode::FromStep(k) => format!("restart at step {}", k),
    }
}

/// One line of a step listing
pub fn format_step_line(step: &StepRecord, entry: Option<&CheckpointEntry>) -> String {
    let marker = match entry {
        Some(_) => CHECK,
        None => SPINNER,
    };
    let when = entry
        .map(|e| style(e.completed_at.format("%Y-%m-%d %H:%M:%S").to_string()).dim().to_string())
        .unwrap_or_default();
    format!(
        "{} {:>4}  {:<40} {}",
        marker,
        step.position,
        if entry.is_some() {
            style(&step.name).green().to_string()
        } else {
            style(&step.name).dim().to_string()
        },
        when
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted { run_name, total_steps } => format!(
            "{} Starting run {} ({} steps)",
            ROCKET,
            style(run_name).bold(),
            total_steps
        ),
        ExecutionEvent::ResumeResolved {
            mode,
            discarded,
            skipped,
            next_step,
        } => {
            let next = match next_step {
                Some(step) => format!("next: {}", style(step).cyan()),
                None => style("nothing left to run").dim().to_string(),
            };
            format!(
                "{} {}: {} checkpoint(s) discarded, {} step(s) skipped, {}",
                INFO,
                format_resume_mode(*mode),
                discarded,
                skipped,
                next
            )
        }
        ExecutionEvent::StepStarted { step, position, total } => format!(
            "{} [{}/{}] {}",
            SPINNER,
            position,
            total,
            style(step).cyan()
        ),
        ExecutionEvent::StepCompleted { step, .. } => {
            format!("{} {}", CHECK, style(step).green())
        }
        ExecutionEvent::StepFailed {
            step,
            exit_code,
            diagnostic,
            ..
        } => {
            let code = exit_code
                .map(|c| format!("exit {}", c))
                .unwrap_or_else(|| "no exit code".to_string());
            format!(
                "{} {} ({}): {}",
                CROSS,
                style(step).red(),
                code,
                style(format_output(diagnostic, 10)).dim()
            )
        }
        ExecutionEvent::RunFinished { run_name, status } => {
            format!("{} Run {} {}", INFO, style(run_name).bold(), format_status(*status))
        }
    }
}

/// Format process output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
