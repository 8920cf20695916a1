//! Run controller - drives a pipeline through its steps

use crate::{
    core::{
        config::{ResumeMode, RunConfig},
        error::PipelineError,
        pipeline::Pipeline,
        state::{ControllerState, ExecutionStatus, RunReport},
    },
    execution::{
        dispatcher::Dispatcher,
        resume::{self, ResumeAction},
        workspace::Workspace,
    },
    persistence::{CheckpointStore, RunLock},
};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_name: String,
        total_steps: usize,
    },
    ResumeResolved {
        mode: ResumeMode,
        discarded: usize,
        skipped: usize,
        next_step: Option<String>,
    },
    StepStarted {
        step: String,
        position: usize,
        total: usize,
    },
    StepCompleted {
        step: String,
        position: usize,
        exit_code: i32,
    },
    StepFailed {
        step: String,
        position: usize,
        exit_code: Option<i32>,
        diagnostic: String,
    },
    RunFinished {
        run_name: String,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// How a run treats earlier state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: ResumeMode,
    /// Reset the workspace on a fresh start
    pub delete_working_dir: bool,
    /// Remove artifact directories of iterations a restart discards
    pub discard_artifacts: bool,
}

impl RunOptions {
    pub fn from_config(config: &RunConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            mode: config.resume_mode()?,
            delete_working_dir: config.delete_working_dir,
            discard_artifacts: config.discard_artifacts,
        })
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: ResumeMode::FreshStart,
            delete_working_dir: false,
            discard_artifacts: false,
        }
    }
}

/// Sequential, checkpointed execution of a [`Pipeline`]
pub struct RunController<D> {
    dispatcher: D,
    store: Arc<dyn CheckpointStore>,
    workspace: Option<Arc<dyn Workspace>>,
    lock_dir: Option<PathBuf>,
    state: ControllerState,
    event_handlers: Vec<EventHandler>,
}

impl<D: Dispatcher> RunController<D> {
    pub fn new(dispatcher: D, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            dispatcher,
            store,
            workspace: None,
            lock_dir: None,
            state: ControllerState::Idle,
            event_handlers: Vec::new(),
        }
    }

    /// Workspace used for fresh-start resets and artifact discards
    pub fn with_workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Hold a lock file in `dir` for the duration of each run
    pub fn with_lock(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Emit an event to all handlers
    fn emit(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Enter `Failed` for `step` and report the terminal state
    fn halt(
        &mut self,
        run_name: &str,
        step: &str,
        position: usize,
        exit_code: Option<i32>,
        diagnostic: String,
    ) {
        self.state = ControllerState::Failed {
            step: step.to_string(),
            diagnostic: diagnostic.clone(),
            failed_at: Utc::now(),
        };
        self.emit(ExecutionEvent::StepFailed {
            step: step.to_string(),
            position,
            exit_code,
            diagnostic,
        });
        self.emit(ExecutionEvent::RunFinished {
            run_name: run_name.to_string(),
            status: ExecutionStatus::Failed,
        });
    }

    /// Resolve the resume point and execute every remaining step in order
    ///
    /// Stops at the first failed step with [`PipelineError::StepExecutionFailure`];
    /// the failed step gets no checkpoint.
    pub async fn run(
        &mut self,
        pipeline: &mut Pipeline,
        options: &RunOptions,
    ) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        let total = pipeline.len();

        let _lock = match &self.lock_dir {
            Some(dir) => Some(RunLock::acquire(dir, &pipeline.run_name)?),
            None => None,
        };

        info!("Starting run '{}' ({} steps)", pipeline.run_name, total);
        self.emit(ExecutionEvent::RunStarted {
            run_name: pipeline.run_name.clone(),
            total_steps: total,
        });

        self.state = ControllerState::Resolving;
        let cursor = match self.resolve(pipeline, options).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Could not resolve resume point: {}", e);
                self.state = ControllerState::Idle;
                return Err(e);
            }
        };

        let mut executed = Vec::new();
        let mut completed: HashSet<String> = pipeline
            .steps
            .iter()
            .filter(|s| s.completed)
            .map(|s| s.name.clone())
            .collect();

        for index in cursor..total {
            self.state = ControllerState::Executing { cursor: index };
            let step = &pipeline.steps[index];
            if !step.dependencies_met(&completed) {
                let err = PipelineError::CheckpointCorruption(format!(
                    "step '{}' reached before its dependencies completed",
                    step.name
                ));
                error!("{}", err);
                self.halt(&pipeline.run_name, &step.name, step.position, None, err.to_string());
                return Err(err);
            }

            info!("[{}/{}] Running {}", step.position, total, step.name);
            self.emit(ExecutionEvent::StepStarted {
                step: step.name.clone(),
                position: step.position,
                total,
            });

            let result = self.dispatcher.execute(&step.operation).await;
            if !result.success {
                let failure = PipelineError::StepExecutionFailure {
                    step: step.name.clone(),
                    exit_code: result.exit_code,
                    diagnostic: result.diagnostic.clone(),
                };
                error!("{}", failure);
                self.halt(
                    &pipeline.run_name,
                    &step.name,
                    step.position,
                    result.exit_code,
                    result.diagnostic,
                );
                return Err(failure);
            }

            let exit_code = result.exit_code.unwrap_or(0);
            if let Err(e) = self.store.mark_complete(step, exit_code).await {
                error!("Could not checkpoint {}: {}", step.name, e);
                self.halt(
                    &pipeline.run_name,
                    &step.name,
                    step.position,
                    Some(exit_code),
                    format!("checkpoint not written: {}", e),
                );
                return Err(e);
            }
            debug!("Checkpointed {}", step.name);

            let name = step.name.clone();
            let position = step.position;
            pipeline.steps[index].completed = true;
            completed.insert(name.clone());
            executed.push(name.clone());
            self.emit(ExecutionEvent::StepCompleted {
                step: name,
                position,
                exit_code,
            });
        }

        let finished_at = Utc::now();
        self.state = ControllerState::Completed {
            completed_at: finished_at,
        };
        info!(
            "Run '{}' completed: {} executed, {} skipped",
            pipeline.run_name,
            executed.len(),
            cursor
        );
        self.emit(ExecutionEvent::RunFinished {
            run_name: pipeline.run_name.clone(),
            status: ExecutionStatus::Completed,
        });

        Ok(RunReport {
            run_name: pipeline.run_name.clone(),
            status: ExecutionStatus::Completed,
            skipped_steps: cursor,
            executed_steps: executed,
            total_steps: total,
            started_at,
            finished_at,
        })
    }

    /// Apply the resume mode; returns the index of the first step to run
    async fn resolve(
        &mut self,
        pipeline: &mut Pipeline,
        options: &RunOptions,
    ) -> Result<usize, PipelineError> {
        if options.delete_working_dir && options.mode != ResumeMode::FreshStart {
            return Err(PipelineError::invalid(
                "the working directory can only be deleted on a fresh start",
            ));
        }

        // A fresh start must succeed even when the log is unreadable
        let before = if options.mode == ResumeMode::FreshStart {
            Vec::new()
        } else {
            self.store.entries().await?
        };
        let plan = resume::plan(pipeline, &before, options.mode)?;

        let discarded = match plan.action {
            ResumeAction::Clear => {
                let cleared = self.store.entries().await.map(|e| e.len()).unwrap_or(0);
                self.store.clear().await?;
                if options.delete_working_dir {
                    match &self.workspace {
                        Some(ws) => ws.reset().await?,
                        None => warn!("No workspace configured; working directory left in place"),
                    }
                }
                info!("Fresh start: {} checkpoint(s) cleared", cleared);
                cleared
            }
            ResumeAction::Keep => 0,
            ResumeAction::DiscardFrom(position) => {
                let removed = self.store.discard_from(position).await?;
                info!("Restarting at step {}: {} checkpoint(s) discarded", position, removed);
                if options.discard_artifacts && !plan.discarded_iterations.is_empty() {
                    if let Some(ws) = &self.workspace {
                        ws.discard_iterations(&plan.discarded_iterations).await?;
                    }
                }
                removed
            }
        };

        let entries = self.store.entries().await?;
        let done: HashSet<&str> = entries.iter().map(|e| e.step.as_str()).collect();
        for step in pipeline.steps.iter_mut() {
            step.completed = done.contains(step.name.as_str());
        }

        let cursor = resume::first_incomplete(pipeline, &entries).unwrap_or(pipeline.len());
        let next_step = pipeline.steps.get(cursor).map(|s| s.name.clone());
        match &next_step {
            Some(name) => info!("Resuming at {} ({} step(s) already complete)", name, cursor),
            None => info!("All steps already complete"),
        }
        self.emit(ExecutionEvent::ResumeResolved {
            mode: options.mode,
            discarded,
            skipped: cursor,
            next_step,
        });

        Ok(cursor)
    }
}
