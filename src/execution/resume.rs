//! Resume planning: what to keep from an earlier run's checkpoints
//!
//! Everything here is a pure function of the pipeline, the checkpoint
//! entries and the requested mode; the controller applies the result.

use crate::core::config::ResumeMode;
use crate::core::error::PipelineError;
use crate::core::pipeline::Pipeline;
use crate::persistence::CheckpointEntry;
use std::collections::HashSet;

/// What the controller must do to the store before executing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeAction {
    /// Drop every entry
    Clear,
    /// Keep every entry
    Keep,
    /// Drop entries at this position and after
    DiscardFrom(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    pub action: ResumeAction,
    /// Iterations whose entries the action removes entirely
    pub discarded_iterations: Vec<usize>,
}

/// Check the log can be trusted for a partial resume
///
/// Every entry must name a step of this pipeline at the same position, no
/// step may appear twice, and the completed steps must form a prefix of
/// the chain.
pub fn validate_log(pipeline: &Pipeline, entries: &[CheckpointEntry]) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    for entry in entries {
        let step = pipeline.step(&entry.step).ok_or_else(|| {
            PipelineError::CheckpointCorruption(format!(
                "log names step '{}' which this configuration does not produce; \
                 start fresh to discard it",
                entry.step
            ))
        })?;
        if step.position != entry.position {
            return Err(PipelineError::CheckpointCorruption(format!(
                "step '{}' logged at position {} but is now at position {}",
                entry.step, entry.position, step.position
            )));
        }
        if !seen.insert(entry.position) {
            return Err(PipelineError::CheckpointCorruption(format!(
                "step '{}' logged more than once",
                entry.step
            )));
        }
    }

    let completed = seen.len();
    if let Some(gap) = (1..=completed).find(|p| !seen.contains(p)) {
        return Err(PipelineError::CheckpointCorruption(format!(
            "{} step(s) logged but step {} ('{}') is missing; completed steps must form a prefix",
            completed,
            gap,
            pipeline.steps[gap - 1].name
        )));
    }
    Ok(())
}

/// Decide how `mode` applies to `entries`
///
/// A fresh start never looks at the entries, so a corrupt log can always be
/// recovered from by starting fresh.
pub fn plan(
    pipeline: &Pipeline,
    entries: &[CheckpointEntry],
    mode: ResumeMode,
) -> Result<ResumePlan, PipelineError> {
    if mode == ResumeMode::FreshStart {
        return Ok(ResumePlan {
            action: ResumeAction::Clear,
            discarded_iterations: Vec::new(),
        });
    }

    validate_log(pipeline, entries)?;

    let from = match mode {
        ResumeMode::FreshStart | ResumeMode::Continue => None,
        ResumeMode::FromIteration(k) => {
            if k < 1 || k > pipeline.iterations {
                return Err(PipelineError::invalid(format!(
                    "cannot restart at iteration {}: run has {} iteration(s)",
                    k, pipeline.iterations
                )));
            }
            Some(pipeline.first_position_of_iteration(k).ok_or_else(|| {
                PipelineError::invalid(format!("iteration {} has no steps", k))
            })?)
        }
        ResumeMode::FromStep(k) => {
            if k < 1 || k > pipeline.len() {
                return Err(PipelineError::invalid(format!(
                    "cannot restart at step {}: pipeline has {} step(s)",
                    k,
                    pipeline.len()
                )));
            }
            Some(k)
        }
    };

    let Some(position) = from else {
        return Ok(ResumePlan {
            action: ResumeAction::Keep,
            discarded_iterations: Vec::new(),
        });
    };

    // A partially restarted iteration keeps its artifacts; its earlier steps stay checkpointed
    let mut discarded_iterations: Vec<usize> = entries
        .iter()
        .filter(|e| e.position >= position)
        .filter_map(|e| e.iteration)
        .filter(|&i| {
            pipeline
                .first_position_of_iteration(i)
                .is_some_and(|first| first >= position)
        })
        .collect();
    discarded_iterations.sort_unstable();
    discarded_iterations.dedup();

    Ok(ResumePlan {
        action: ResumeAction::DiscardFrom(position),
        discarded_iterations,
    })
}

/// Index of the first step without an entry, or `None` when all are done
pub fn first_incomplete(pipeline: &Pipeline, entries: &[CheckpointEntry]) -> Option<usize> {
    let done: HashSet<&str> = entries.iter().map(|e| e.step.as_str()).collect();
    pipeline.steps.iter().position(|s| !done.contains(s.name.as_str()))
}
