//! CLI command definitions

use crate::core::config::ResumeMode;
use clap::Args;

/// Run a protocol
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to run configuration YAML file
    #[arg(short, long)]
    pub file: String,

    /// Configuration overrides (dotted.key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    #[command(flatten)]
    pub resume: ResumeArgs,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Resume selection; overrides the configuration file
#[derive(Debug, Args, Clone, Default)]
#[group(multiple = false)]
pub struct ResumeArgs {
    /// Discard all checkpoints and start over
    #[arg(long)]
    pub fresh: bool,

    /// Pick up at the first step without a checkpoint
    #[arg(long = "continue")]
    pub continue_run: bool,

    /// Re-run iteration N and everything after it
    #[arg(long, value_name = "N")]
    pub from_iteration: Option<usize>,

    /// Re-run step N (1-based position) and everything after it
    #[arg(long, value_name = "N")]
    pub from_step: Option<usize>,
}

impl ResumeArgs {
    pub fn mode(&self) -> Option<ResumeMode> {
        if self.fresh {
            Some(ResumeMode::FreshStart)
        } else if self.continue_run {
            Some(ResumeMode::Continue)
        } else if let Some(k) = self.from_iteration {
            Some(ResumeMode::FromIteration(k))
        } else {
            self.from_step.map(ResumeMode::FromStep)
        }
    }
}

/// Validate a run configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to run configuration YAML file
    #[arg(short, long)]
    pub file: String,

    /// Configuration overrides (dotted.key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Output the step chain in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show checkpoint progress
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Path to run configuration YAML file
    #[arg(short, long)]
    pub file: String,

    /// Configuration overrides (dotted.key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Expand compact notation
#[derive(Debug, Args, Clone)]
pub struct ExpandCommand {
    /// Notation to expand, e.g. "2x8 2x2"
    pub tokens: String,

    /// Number of iterations
    #[arg(short = 'n', long)]
    pub iterations: usize,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
