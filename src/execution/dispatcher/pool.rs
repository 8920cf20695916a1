//! Fan-out of independent inputs across concurrent workers

use super::{Dispatcher, ExecutionResult};
use crate::core::step::Operation;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Splits a fan-out operation's inputs into up to `workers` chunks and runs
/// the inner dispatcher on each chunk concurrently
///
/// The step succeeds only if every chunk does. Operations that are not
/// marked fan-out, or have a single input, go whole to the pass-through
/// dispatcher, which defaults to the chunk dispatcher.
pub struct WorkerPoolDispatcher {
    inner: Arc<dyn Dispatcher>,
    passthrough: Arc<dyn Dispatcher>,
    workers: usize,
}

impl WorkerPoolDispatcher {
    pub fn new(inner: Arc<dyn Dispatcher>, workers: usize) -> Self {
        Self {
            passthrough: inner.clone(),
            inner,
            workers: workers.max(1),
        }
    }

    /// Dispatcher for operations that are not split into chunks
    pub fn with_passthrough(mut self, passthrough: Arc<dyn Dispatcher>) -> Self {
        self.passthrough = passthrough;
        self
    }

    /// Contiguous chunks, at most `workers` of them, sizes differing by at most one
    pub fn partition(inputs: &[String], workers: usize) -> Vec<Vec<String>> {
        let workers = workers.max(1).min(inputs.len().max(1));
        let base = inputs.len() / workers;
        let extra = inputs.len() % workers;

        let mut chunks = Vec::with_capacity(workers);
        let mut start = 0;
        for w in 0..workers {
            let size = base + usize::from(w < extra);
            if size == 0 {
                continue;
            }
            chunks.push(inputs[start..start + size].to_vec());
            start += size;
        }
        chunks
    }
}

#[async_trait]
impl Dispatcher for WorkerPoolDispatcher {
    async fn execute(&self, operation: &Operation) -> ExecutionResult {
        if !operation.fan_out || operation.inputs.len() <= 1 || self.workers == 1 {
            return self.passthrough.execute(operation).await;
        }

        let chunks = Self::partition(&operation.inputs, self.workers);
        debug!(
            "Fanning out {} over {} input(s) in {} chunk(s)",
            operation.action,
            operation.inputs.len(),
            chunks.len()
        );

        let mut tasks = JoinSet::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let inner = self.inner.clone();
            let sub = operation.with_inputs(chunk);
            tasks.spawn(async move { (index, inner.execute(&sub).await) });
        }

        let mut failures: Vec<(usize, ExecutionResult)> = Vec::new();
        let mut exit_code = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) if result.success => {
                    exit_code = exit_code.max(result.exit_code.unwrap_or(0));
                    debug!("Chunk {} of {} finished", index, operation.action);
                }
                Ok((index, result)) => failures.push((index, result)),
                Err(e) => failures.push((
                    usize::MAX,
                    ExecutionResult::failure(None, format!("worker panicked: {}", e)),
                )),
            }
        }

        if failures.is_empty() {
            return ExecutionResult::success(exit_code);
        }

        failures.sort_by_key(|(index, _)| *index);
        warn!("{} chunk(s) of {} failed", failures.len(), operation.action);
        let first_code = failures.iter().find_map(|(_, r)| r.exit_code);
        let diagnostic = failures
            .iter()
            .map(|(index, r)| match index {
                &usize::MAX => r.diagnostic.clone(),
                i => format!("chunk {}: {}", i, r.diagnostic),
            })
            .collect::<Vec<_>>()
            .join("\n");
        ExecutionResult::failure(first_code, diagnostic)
    }
}
