//! Local program execution

use super::{CommandRenderer, Dispatcher, ExecutionResult};
use crate::core::step::Operation;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Lines of stderr kept in a failure diagnostic
const DIAGNOSTIC_LINES: usize = 20;

/// Runs each operation as a child process and waits for it
#[derive(Debug, Clone)]
pub struct SubprocessDispatcher {
    renderer: CommandRenderer,
    timeout_secs: Option<u64>,
}

impl SubprocessDispatcher {
    pub fn new(renderer: CommandRenderer) -> Self {
        Self {
            renderer,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Last few lines of a process's stderr
pub(crate) fn tail(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl Dispatcher for SubprocessDispatcher {
    async fn execute(&self, operation: &Operation) -> ExecutionResult {
        let argv = self.renderer.argv(operation);
        let Some((program, args)) = argv.split_first() else {
            return ExecutionResult::failure(None, "empty command line");
        };
        debug!("Spawning {} with {} argument(s)", program, args.len());

        let mut command = Command::new(program);
        command.args(args).envs(self.renderer.env()).kill_on_drop(true);

        let output = match self.timeout_secs {
            Some(secs) => match timeout(Duration::from_secs(secs), command.output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("{} timed out after {}s", program, secs);
                    return ExecutionResult::failure(None, format!("timed out after {}s", secs));
                }
            },
            None => command.output().await,
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to spawn {}: {}", program, e);
                return ExecutionResult::failure(None, format!("failed to spawn {}: {}", program, e));
            }
        };

        let code = output.status.code();
        if output.status.success() {
            debug!("{} exited cleanly", program);
            ExecutionResult::success(code.unwrap_or(0))
        } else {
            let stderr = tail(&output.stderr);
            warn!("{} exited with code {:?}: {}", program, code, stderr);
            let diagnostic = if stderr.is_empty() {
                format!("{} exited with status {}", program, output.status)
            } else {
                stderr
            };
            ExecutionResult::failure(code, diagnostic)
        }
    }
}
