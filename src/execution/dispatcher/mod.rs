//! Dispatchers run a step's operation and report how it went
//!
//! The controller awaits one dispatcher call per step. Any fan-out, MPI
//! launch or batch-queue round trip happens behind this interface.

pub mod command;
pub mod pool;
pub mod queue;
pub mod subprocess;

pub use command::CommandRenderer;
pub use pool::WorkerPoolDispatcher;
pub use queue::QueueDispatcher;
pub use subprocess::SubprocessDispatcher;

use crate::core::config::{DispatchConfig, DispatchMode};
use crate::core::step::Operation;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Outcome of one dispatcher call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub diagnostic: String,
}

impl ExecutionResult {
    pub fn success(exit_code: i32) -> Self {
        Self {
            success: true,
            exit_code: Some(exit_code),
            diagnostic: String::new(),
        }
    }

    pub fn failure(exit_code: Option<i32>, diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Trait for operation execution - allows for different implementations
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn execute(&self, operation: &Operation) -> ExecutionResult;
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    async fn execute(&self, operation: &Operation) -> ExecutionResult {
        (**self).execute(operation).await
    }
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Box<D> {
    async fn execute(&self, operation: &Operation) -> ExecutionResult {
        (**self).execute(operation).await
    }
}

/// Handler invoked for one action by [`InProcessDispatcher`]
pub type ActionHandler = Arc<dyn Fn(&Operation) -> ExecutionResult + Send + Sync>;

/// Runs operations through handlers registered per action
#[derive(Default, Clone)]
pub struct InProcessDispatcher {
    handlers: HashMap<String, ActionHandler>,
}

impl InProcessDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any earlier one
    pub fn register<F>(mut self, action: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Operation) -> ExecutionResult + Send + Sync + 'static,
    {
        self.handlers.insert(action.into(), Arc::new(handler));
        self
    }

    pub fn handles(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }
}

#[async_trait]
impl Dispatcher for InProcessDispatcher {
    async fn execute(&self, operation: &Operation) -> ExecutionResult {
        match self.handlers.get(&operation.action) {
            Some(handler) => handler(operation),
            None => ExecutionResult::failure(
                None,
                format!("no handler registered for action '{}'", operation.action),
            ),
        }
    }
}

/// Build the dispatcher `config` selects
///
/// Local mode runs programs directly; with more than one thread the
/// fan-out inputs of a step are split across that many single-threaded
/// workers, while every other step runs whole with all threads. Queue mode submits one job script per step.
pub fn build_dispatcher(config: &DispatchConfig, script_dir: &Path) -> Arc<dyn Dispatcher> {
    match config.mode {
        DispatchMode::Local if config.threads > 1 => {
            let chunk = SubprocessDispatcher::new(CommandRenderer::from_config(config).with_threads(1))
                .with_timeout(config.timeout_secs);
            let whole = SubprocessDispatcher::new(CommandRenderer::from_config(config))
                .with_timeout(config.timeout_secs);
            Arc::new(
                WorkerPoolDispatcher::new(Arc::new(chunk), config.threads)
                    .with_passthrough(Arc::new(whole)),
            )
        }
        DispatchMode::Local => Arc::new(
            SubprocessDispatcher::new(CommandRenderer::from_config(config))
                .with_timeout(config.timeout_secs),
        ),
        DispatchMode::Queue => Arc::new(QueueDispatcher::new(
            CommandRenderer::from_config(config),
            config.queue.clone(),
            script_dir.to_path_buf(),
        )),
    }
}
