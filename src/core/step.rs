//! Step domain model

use crate::core::expand::ParamValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// An externally executed action plus its resolved arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Action identifier, mapped to a program or handler by the dispatcher
    pub action: String,

    /// Named arguments, already resolved for the step's iteration
    #[serde(default)]
    pub args: BTreeMap<String, ParamValue>,

    /// Data items the operation works on
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Inputs are independent and may be partitioned across workers
    #[serde(default)]
    pub fan_out: bool,
}

impl Operation {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            args: BTreeMap::new(),
            inputs: Vec::new(),
            fan_out: false,
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn input(mut self, item: impl Into<String>) -> Self {
        self.inputs.push(item.into());
        self
    }

    pub fn inputs<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(items.into_iter().map(Into::into));
        self
    }

    /// Mark the inputs as independent work items
    pub fn fan_out(mut self) -> Self {
        self.fan_out = true;
        self
    }

    /// Same operation restricted to a subset of its inputs
    pub fn with_inputs(&self, inputs: Vec<String>) -> Self {
        Self {
            action: self.action.clone(),
            args: self.args.clone(),
            inputs,
            fan_out: self.fan_out,
        }
    }
}

/// Where a step sits in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Setup,
    Iteration,
    Finalize,
}

/// A single step in a pipeline
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// Unique, position-derived identifier; doubles as the checkpoint key
    pub name: String,

    /// 1-based position in the chain
    pub position: usize,

    pub phase: StepPhase,

    /// Iteration this step belongs to (`None` for setup and finalization)
    pub iteration: Option<usize>,

    pub operation: Operation,

    /// Steps that must be complete first (the immediate predecessor)
    pub depends_on: Vec<String>,

    /// Set by the run controller once the step's checkpoint is written
    #[serde(skip)]
    pub completed: bool,
}

impl StepRecord {
    /// Deterministic name from the step's place in the chain
    pub fn step_name(phase: StepPhase, iteration: Option<usize>, substep: usize, label: &str) -> String {
        match (phase, iteration) {
            (StepPhase::Iteration, Some(i)) => format!("iter_{:03}.{:02}_{}", i, substep, label),
            (StepPhase::Finalize, _) => format!("final.{:02}_{}", substep, label),
            _ => format!("setup.{:02}_{}", substep, label),
        }
    }

    /// Short label without the position prefix
    pub fn label(&self) -> &str {
        self.name
            .split_once('_')
            .and_then(|(_, rest)| {
                if self.phase == StepPhase::Iteration {
                    rest.split_once('_').map(|(_, label)| label)
                } else {
                    Some(rest)
                }
            })
            .unwrap_or(&self.name)
    }

    /// Check if all dependencies are satisfied
    pub fn dependencies_met(&self, completed: &HashSet<String>) -> bool {
        self.depends_on.iter().all(|dep| completed.contains(dep))
    }
}
