//! Error taxonomy for pipeline resolution and execution

use thiserror::Error;

/// Errors raised while resolving, building or running a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Compact-notation parameter string violates the `RxV` grammar
    #[error("malformed token '{token}' in '{input}': {reason}")]
    MalformedToken {
        token: String,
        input: String,
        reason: String,
    },

    /// Run configuration is structurally inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A dispatcher reported failure for a step
    #[error("step '{step}' failed (exit code {}): {diagnostic}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    StepExecutionFailure {
        step: String,
        exit_code: Option<i32>,
        diagnostic: String,
    },

    /// Persisted checkpoint log cannot be trusted for resume
    #[error("checkpoint corruption: {0}")]
    CheckpointCorruption(String),

    /// Another controller holds the run
    #[error("run '{0}' is locked by another process")]
    RunLocked(String),

    /// Backend failure in the checkpoint store
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        PipelineError::InvalidConfiguration(message.into())
    }

    /// True for errors raised before any step could run
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedToken { .. } | PipelineError::InvalidConfiguration(_)
        )
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}
