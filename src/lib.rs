//! protorun - resumable multi-iteration pipeline runner for imaging protocols

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::config::{ResumeMode, RunConfig};
pub use core::expand::{expand, IterationValueTable, ParamValue};
pub use core::{ExecutionStatus, Operation, Pipeline, PipelineBuilder, PipelineError, StepRecord};
pub use execution::{Dispatcher, ExecutionEvent, ExecutionResult, RunController, RunOptions};
pub use persistence::{CheckpointEntry, CheckpointStore, InMemoryCheckpointStore, JsonlCheckpointLog};
