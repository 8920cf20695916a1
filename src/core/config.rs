//! Run configuration from YAML

use crate::core::error::PipelineError;
use crate::core::protocol::ProtocolConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// How a run treats checkpoints left by earlier invocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "at", rename_all = "snake_case")]
pub enum ResumeMode {
    /// Clear every checkpoint and start from the first step
    #[default]
    FreshStart,
    /// Keep every checkpoint and pick up at the first incomplete step
    Continue,
    /// Re-run iteration `k` and everything after it
    FromIteration(usize),
    /// Re-run the step at absolute position `k` and everything after it
    FromStep(usize),
}

impl ResumeMode {
    /// Resolve the flat `continue_at_iteration` / `is_iter` selector
    ///
    /// `1` starts a new run, `-1` continues where the last run stopped and
    /// any `N > 1` restarts at iteration `N` (`is_iter`) or step `N`.
    pub fn from_legacy(continue_at: i64, is_iter: bool) -> Result<Self, PipelineError> {
        match continue_at {
            1 => Ok(ResumeMode::FreshStart),
            -1 => Ok(ResumeMode::Continue),
            n if n > 1 => {
                let n = n as usize;
                Ok(if is_iter {
                    ResumeMode::FromIteration(n)
                } else {
                    ResumeMode::FromStep(n)
                })
            }
            other => Err(PipelineError::invalid(format!(
                "continue_at_iteration must be 1, -1 or greater than 1, got {}",
                other
            ))),
        }
    }
}

/// Where checkpoints are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// `<working_dir>/checkpoints.jsonl`
    #[default]
    Jsonl,
    /// `<working_dir>/checkpoints.db`
    Sqlite,
}

/// Execution mode for step operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Spawn programs on this machine
    #[default]
    Local,
    /// Submit job scripts to a batch queue
    Queue,
}

/// Batch queue submission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub hours: u32,

    /// Blocking submit command; the job script path is appended.
    /// `{queue}` and `{hours}` are substituted.
    pub submit_command: Vec<String>,

    /// Extra submissions after a failed job
    pub resubmit_attempts: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            hours: 72,
            submit_command: vec![
                "sbatch".to_string(),
                "--wait".to_string(),
                "--partition={queue}".to_string(),
                "--time={hours}:00:00".to_string(),
            ],
            resubmit_attempts: 0,
        }
    }
}

/// Dispatcher selection and parallelism
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,

    /// Shared-memory threads per step; also the worker-pool width
    pub threads: usize,

    /// Message-passing processes per step
    pub mpi_processes: usize,

    /// Launcher prefix for multi-process steps; `{procs}` is substituted
    pub mpi_launcher: Vec<String>,

    /// Action name to executable; unmapped actions run a program of the same name
    pub programs: HashMap<String, String>,

    /// Per-step wall-clock limit for local programs
    pub timeout_secs: Option<u64>,

    pub queue: QueueConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Local,
            threads: 1,
            mpi_processes: 1,
            mpi_launcher: vec!["mpirun".to_string(), "-np".to_string(), "{procs}".to_string()],
            programs: HashMap::new(),
            timeout_secs: None,
            queue: QueueConfig::default(),
        }
    }
}

/// Top-level run configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run identity; unique per protocol output folder
    pub run_name: String,

    #[serde(default)]
    pub comment: Option<String>,

    /// Working directory holding artifacts and checkpoints for this run
    pub working_dir: PathBuf,

    #[serde(default = "default_iterations")]
    pub iterations: usize,

    #[serde(default)]
    pub resume: ResumeMode,

    /// Flat resume selector; overrides `resume` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_at_iteration: Option<i64>,

    /// Whether `continue_at_iteration` counts iterations rather than steps
    #[serde(default)]
    pub is_iter: bool,

    /// Delete the working directory on a fresh start
    #[serde(default)]
    pub delete_working_dir: bool,

    /// Also delete artifact directories of iterations discarded by a restart
    #[serde(default)]
    pub discard_artifacts: bool,

    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub checkpoint_backend: CheckpointBackend,
}

fn default_iterations() -> usize {
    1
}

impl RunConfig {
    /// Load configuration from a YAML file, applying `key=value` overrides
    pub fn load<P: AsRef<Path>>(path: P, overrides: &[(String, String)]) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml_with_overrides(&content, overrides)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_yaml_with_overrides(yaml, &[])
    }

    pub fn from_yaml_with_overrides(yaml: &str, overrides: &[(String, String)]) -> Result<Self> {
        let mut document: Value = serde_yaml::from_str(yaml).context("Invalid YAML")?;
        for (key, raw) in overrides {
            apply_override(&mut document, key, raw)?;
        }
        let config: RunConfig =
            serde_yaml::from_value(document).context("Invalid run configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// The resume mode after applying the flat selector
    pub fn resume_mode(&self) -> Result<ResumeMode, PipelineError> {
        match self.continue_at_iteration {
            Some(n) => ResumeMode::from_legacy(n, self.is_iter),
            None => Ok(self.resume),
        }
    }

    /// Check internal consistency; protocol-specific checks run in the builder
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.run_name.trim().is_empty() {
            return Err(PipelineError::invalid("run_name must not be empty"));
        }
        if self.run_name.contains(['/', '\\']) {
            return Err(PipelineError::invalid(format!(
                "run_name '{}' must not contain path separators",
                self.run_name
            )));
        }
        if self.iterations < 1 {
            return Err(PipelineError::invalid(format!(
                "iterations must be at least 1, got {}",
                self.iterations
            )));
        }

        let mode = self.resume_mode()?;
        if self.delete_working_dir && mode != ResumeMode::FreshStart {
            return Err(PipelineError::invalid(
                "delete_working_dir is only allowed on a fresh start; \
                 resuming needs the existing working directory",
            ));
        }

        if self.dispatch.threads < 1 || self.dispatch.mpi_processes < 1 {
            return Err(PipelineError::invalid(
                "dispatch.threads and dispatch.mpi_processes must be at least 1",
            ));
        }
        if self.dispatch.mode == DispatchMode::Queue && self.dispatch.queue.submit_command.is_empty() {
            return Err(PipelineError::invalid(
                "dispatch.queue.submit_command must not be empty in queue mode",
            ));
        }

        Ok(())
    }

    /// Directory for one iteration's artifacts
    pub fn iteration_dir(&self, iteration: usize) -> PathBuf {
        self.working_dir.join(format!("Iter_{}", iteration))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        match self.checkpoint_backend {
            CheckpointBackend::Jsonl => self.working_dir.join("checkpoints.jsonl"),
            CheckpointBackend::Sqlite => self.working_dir.join("checkpoints.db"),
        }
    }
}

/// Set a dotted `key` in a YAML document, parsing `raw` as a YAML scalar
fn apply_override(document: &mut Value, key: &str, raw: &str) -> Result<()> {
    let parsed: Value =
        serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    let mut node = document;
    let mut parts = key.split('.').peekable();
    while let Some(part) = parts.next() {
        let Value::Mapping(map) = node else {
            anyhow::bail!("Cannot override '{}': '{}' is not a mapping", key, part);
        };
        let entry_key = Value::String(part.to_string());
        if parts.peek().is_none() {
            map.insert(entry_key, parsed);
            return Ok(());
        }
        node = map
            .entry(entry_key)
            .or_insert_with(|| Value::Mapping(Default::default()));
    }

    anyhow::bail!("Empty override key")
}
