//! Batch-queue submission

use super::command::shell_quote;
use super::subprocess::tail;
use super::{CommandRenderer, Dispatcher, ExecutionResult};
use crate::core::config::QueueConfig;
use crate::core::step::Operation;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Writes a job script per operation and runs a blocking submit command
///
/// The submit command must wait for the job to finish; its exit status is
/// taken as the job's. Failed jobs are resubmitted up to
/// `resubmit_attempts` more times.
pub struct QueueDispatcher {
    renderer: CommandRenderer,
    queue: QueueConfig,
    script_dir: PathBuf,
}

impl QueueDispatcher {
    pub fn new(renderer: CommandRenderer, queue: QueueConfig, script_dir: PathBuf) -> Self {
        Self {
            renderer,
            queue,
            script_dir,
        }
    }

    /// Shell script running `operation` with the configured environment
    pub fn job_script(&self, operation: &Operation) -> String {
        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!(
            "# {} on queue {} for up to {}h\n",
            operation.action, self.queue.name, self.queue.hours
        ));
        for (key, value) in self.renderer.env() {
            script.push_str(&format!("export {}={}\n", key, shell_quote(&value)));
        }
        let command: Vec<String> = self
            .renderer
            .argv(operation)
            .iter()
            .map(|arg| shell_quote(arg))
            .collect();
        script.push_str(&format!("exec {}\n", command.join(" ")));
        script
    }

    /// Submit command with placeholders filled in and the script appended
    pub fn submit_argv(&self, script: &Path) -> Vec<String> {
        let hours = self.queue.hours.to_string();
        let mut argv: Vec<String> = self
            .queue
            .submit_command
            .iter()
            .map(|part| part.replace("{queue}", &self.queue.name).replace("{hours}", &hours))
            .collect();
        argv.push(script.display().to_string());
        argv
    }

    async fn write_script(&self, operation: &Operation) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.script_dir).await?;
        let path = self
            .script_dir
            .join(format!("{}_{}.sh", operation.action, Uuid::new_v4()));
        tokio::fs::write(&path, self.job_script(operation)).await?;
        Ok(path)
    }

    async fn submit(&self, script: &Path) -> ExecutionResult {
        let argv = self.submit_argv(script);
        let Some((program, args)) = argv.split_first() else {
            return ExecutionResult::failure(None, "empty submit command");
        };
        match Command::new(program).args(args).kill_on_drop(true).output().await {
            Ok(output) if output.status.success() => {
                ExecutionResult::success(output.status.code().unwrap_or(0))
            }
            Ok(output) => ExecutionResult::failure(
                output.status.code(),
                format!("job {} failed: {}", script.display(), tail(&output.stderr)),
            ),
            Err(e) => ExecutionResult::failure(None, format!("failed to run {}: {}", program, e)),
        }
    }
}

#[async_trait]
impl Dispatcher for QueueDispatcher {
    async fn execute(&self, operation: &Operation) -> ExecutionResult {
        let script = match self.write_script(operation).await {
            Ok(path) => path,
            Err(e) => {
                return ExecutionResult::failure(None, format!("failed to write job script: {}", e))
            }
        };
        debug!("Job script for {} written to {}", operation.action, script.display());

        let attempts = self.queue.resubmit_attempts + 1;
        let mut last = ExecutionResult::failure(None, "job was never submitted");
        for attempt in 1..=attempts {
            info!(
                "Submitting {} to queue {} (attempt {}/{})",
                operation.action, self.queue.name, attempt, attempts
            );
            last = self.submit(&script).await;
            if last.success {
                return last;
            }
            warn!("Job for {} failed on attempt {}: {}", operation.action, attempt, last.diagnostic);
        }

        last.diagnostic = format!("{} (after {} attempt(s))", last.diagnostic, attempts);
        last
    }
}
