//! Protocol catalogue
//!
//! A protocol knows which of its parameters vary per iteration, which
//! preconditions the parameter set must satisfy, and which operations make up
//! its setup, per-iteration and finalization phases. Naming, positions and
//! dependency wiring are left to the pipeline builder.

pub mod normal_modes;
pub mod projection_matching;
pub mod screen_deep_learning;

pub use normal_modes::*;
pub use projection_matching::*;
pub use screen_deep_learning::*;

use crate::core::error::PipelineError;
use crate::core::expand::{IterationValueTable, ParamValue, PerIteration};
use crate::core::step::Operation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Expanded per-iteration parameters keyed by parameter name
pub type ValueTables = BTreeMap<String, IterationValueTable>;

/// A labelled operation, not yet placed in the chain
#[derive(Debug, Clone)]
pub struct StepDraft {
    pub label: String,
    pub operation: Operation,
}

impl StepDraft {
    /// Draft whose label is the operation's action
    pub fn from_operation(operation: Operation) -> Self {
        Self {
            label: operation.action.clone(),
            operation,
        }
    }
}

/// Read-only view handed to a protocol while it lays out steps
pub struct BuildContext<'a> {
    pub working_dir: &'a Path,
    pub iterations: usize,
    pub tables: &'a ValueTables,
}

impl<'a> BuildContext<'a> {
    /// Value of `param` for `iteration` (1-based)
    pub fn value(&self, param: &str, iteration: usize) -> Result<&'a ParamValue, PipelineError> {
        let table = self.tables.get(param).ok_or_else(|| {
            PipelineError::invalid(format!("no value table for parameter '{}'", param))
        })?;
        if iteration < 1 || iteration > table.len() {
            return Err(PipelineError::invalid(format!(
                "parameter '{}' has {} values, iteration {} requested",
                param,
                table.len(),
                iteration
            )));
        }
        Ok(table.get(iteration))
    }

    pub fn is_on(&self, param: &str, iteration: usize) -> Result<bool, PipelineError> {
        Ok(self.value(param, iteration)?.is_truthy())
    }

    /// True if `param` is truthy in at least one iteration
    pub fn any_on(&self, param: &str) -> bool {
        self.tables.get(param).map(|t| t.any_truthy()).unwrap_or(false)
    }

    pub fn iteration_dir(&self, iteration: usize) -> PathBuf {
        self.working_dir.join(format!("Iter_{}", iteration))
    }

    /// `<working_dir>/Iter_{i}/<file>` rendered for an operation argument
    pub fn iteration_file(&self, iteration: usize, file: &str) -> String {
        self.iteration_dir(iteration).join(file).display().to_string()
    }
}

/// Behaviour shared by every protocol
pub trait Protocol: Send + Sync {
    /// Protocol identifier as written in the configuration
    fn kind(&self) -> &'static str;

    /// Upper bound on the iteration count; single-pass protocols return 1
    fn max_iterations(&self) -> Option<usize> {
        None
    }

    /// Parameters written in compact per-iteration notation
    fn per_iteration(&self) -> Vec<(&'static str, &PerIteration)> {
        Vec::new()
    }

    /// Cross-parameter preconditions, checked after expansion
    fn validate(&self, ctx: &BuildContext<'_>) -> Result<(), PipelineError>;

    fn setup_steps(&self, ctx: &BuildContext<'_>) -> Result<Vec<StepDraft>, PipelineError>;

    fn iteration_steps(
        &self,
        iteration: usize,
        ctx: &BuildContext<'_>,
    ) -> Result<Vec<StepDraft>, PipelineError>;

    fn finalize_steps(&self, ctx: &BuildContext<'_>) -> Result<Vec<StepDraft>, PipelineError>;
}

/// Protocol selection plus its parameters, tagged by `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolConfig {
    ProjectionMatching(ProjectionMatching),
    NormalModes(NormalModes),
    ScreenDeepLearning(ScreenDeepLearning),
}

impl ProtocolConfig {
    pub fn as_protocol(&self) -> &dyn Protocol {
        match self {
            ProtocolConfig::ProjectionMatching(p) => p,
            ProtocolConfig::NormalModes(p) => p,
            ProtocolConfig::ScreenDeepLearning(p) => p,
        }
    }
}

/// Expand every per-iteration parameter of `protocol` to `iterations` values
pub fn expand_tables(protocol: &dyn Protocol, iterations: usize) -> Result<ValueTables, PipelineError> {
    protocol
        .per_iteration()
        .into_iter()
        .map(|(name, notation)| Ok((name.to_string(), notation.expand(iterations)?)))
        .collect()
}
