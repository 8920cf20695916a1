//! Pipeline domain model and builder

use crate::core::config::RunConfig;
use crate::core::error::PipelineError;
use crate::core::protocol::{expand_tables, BuildContext, Protocol, StepDraft, ValueTables};
use crate::core::step::{StepPhase, StepRecord};
use std::collections::HashSet;
use tracing::debug;

/// An ordered, fully resolved chain of steps for one run
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub run_name: String,

    /// Protocol kind the chain was built from
    pub protocol: String,

    pub iterations: usize,

    /// Steps in execution order; `steps[k].position == k + 1`
    pub steps: Vec<StepRecord>,
}

impl Pipeline {
    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Position of the first step belonging to `iteration`
    pub fn first_position_of_iteration(&self, iteration: usize) -> Option<usize> {
        self.steps
            .iter()
            .find(|s| s.iteration == Some(iteration))
            .map(|s| s.position)
    }

    pub fn steps_in_iteration(&self, iteration: usize) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(move |s| s.iteration == Some(iteration))
    }

    /// Names of every step in the chain
    pub fn step_names(&self) -> HashSet<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Check if every step has been marked complete
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }

    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.completed).count()
    }
}

/// Turns a validated run configuration into a [`Pipeline`]
pub struct PipelineBuilder<'a> {
    config: &'a RunConfig,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    /// Expand every per-iteration parameter and build the chain
    pub fn build(&self) -> Result<Pipeline, PipelineError> {
        self.check_iterations()?;
        let protocol = self.config.protocol.as_protocol();
        let tables = expand_tables(protocol, self.config.iterations)?;
        self.build_with_tables(&tables)
    }

    /// Build from already expanded value tables
    ///
    /// Every table the protocol declares must be present with exactly one
    /// value per iteration.
    pub fn build_with_tables(&self, tables: &ValueTables) -> Result<Pipeline, PipelineError> {
        self.config.validate()?;
        self.check_iterations()?;

        let protocol = self.config.protocol.as_protocol();
        let n = self.config.iterations;
        for (name, _) in protocol.per_iteration() {
            let table = tables.get(name).ok_or_else(|| {
                PipelineError::invalid(format!("missing value table for '{}'", name))
            })?;
            if table.len() != n {
                return Err(PipelineError::invalid(format!(
                    "value table '{}' has {} entries, expected {}",
                    name,
                    table.len(),
                    n
                )));
            }
        }

        let ctx = BuildContext {
            working_dir: &self.config.working_dir,
            iterations: n,
            tables,
        };
        protocol.validate(&ctx)?;

        let mut steps: Vec<StepRecord> = Vec::new();
        push_phase(&mut steps, StepPhase::Setup, None, protocol.setup_steps(&ctx)?);
        for i in 1..=n {
            push_phase(&mut steps, StepPhase::Iteration, Some(i), protocol.iteration_steps(i, &ctx)?);
        }
        push_phase(&mut steps, StepPhase::Finalize, None, protocol.finalize_steps(&ctx)?);

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name.as_str()) {
                return Err(PipelineError::invalid(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }

        debug!(
            "Built {} pipeline '{}' with {} steps over {} iteration(s)",
            protocol.kind(),
            self.config.run_name,
            steps.len(),
            n
        );

        Ok(Pipeline {
            run_name: self.config.run_name.clone(),
            protocol: protocol.kind().to_string(),
            iterations: n,
            steps,
        })
    }

    fn check_iterations(&self) -> Result<(), PipelineError> {
        let protocol: &dyn Protocol = self.config.protocol.as_protocol();
        let n = self.config.iterations;
        if n < 1 {
            return Err(PipelineError::invalid("iterations must be at least 1"));
        }
        if let Some(max) = protocol.max_iterations() {
            if n > max {
                return Err(PipelineError::invalid(format!(
                    "{} allows at most {} iteration(s), got {}",
                    protocol.kind(),
                    max,
                    n
                )));
            }
        }
        Ok(())
    }
}

/// Append one phase's drafts, numbering them and chaining each on its predecessor
fn push_phase(steps: &mut Vec<StepRecord>, phase: StepPhase, iteration: Option<usize>, drafts: Vec<StepDraft>) {
    for (substep, draft) in drafts.into_iter().enumerate() {
        let depends_on = steps.last().map(|prev| vec![prev.name.clone()]).unwrap_or_default();
        steps.push(StepRecord {
            name: StepRecord::step_name(phase, iteration, substep, &draft.label),
            position: steps.len() + 1,
            phase,
            iteration,
            operation: draft.operation,
            depends_on,
            completed: false,
        });
    }
}
