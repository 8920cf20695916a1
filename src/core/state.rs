//! Run controller state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Every step has a checkpoint
    Completed,
    /// A step failed; later steps were not dispatched
    Failed,
}

/// Controller lifecycle: `Idle → Resolving → Executing → Completed | Failed`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    /// Nothing resolved yet
    #[default]
    Idle,
    /// Applying the resume mode to the checkpoint log
    Resolving,
    /// Dispatching the step at `cursor` (0-based index into the chain)
    Executing { cursor: usize },
    /// All steps checkpointed
    Completed { completed_at: DateTime<Utc> },
    /// Halted on a failed step
    Failed {
        step: String,
        diagnostic: String,
        failed_at: DateTime<Utc>,
    },
}

impl ControllerState {
    /// Check if the controller reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerState::Completed { .. } | ControllerState::Failed { .. }
        )
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        match self {
            ControllerState::Completed { .. } => Some(ExecutionStatus::Completed),
            ControllerState::Failed { .. } => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// Summary of one controller invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_name: String,
    pub status: ExecutionStatus,

    /// Steps skipped because they were already checkpointed
    pub skipped_steps: usize,

    /// Names of steps dispatched in this invocation, in order
    pub executed_steps: Vec<String>,

    pub total_steps: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Fraction of the chain checkpointed (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        let done = self.skipped_steps + self.executed_steps.len();
        done as f64 / self.total_steps as f64
    }
}
