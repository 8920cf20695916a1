//! Particle screening with a trained classifier (single pass)

use super::{BuildContext, Protocol, StepDraft};
use crate::core::error::PipelineError;
use crate::core::step::Operation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenDeepLearning {
    /// Particles known to be good
    pub true_particles: String,
    /// Negative examples
    pub negatives: String,
    /// Putative particles to score
    pub particles: String,
    pub epochs: f64,
    pub learning_rate: f64,
}

impl Default for ScreenDeepLearning {
    fn default() -> Self {
        Self {
            true_particles: String::new(),
            negatives: String::new(),
            particles: String::new(),
            epochs: 4.0,
            learning_rate: 0.0001,
        }
    }
}

impl Protocol for ScreenDeepLearning {
    fn kind(&self) -> &'static str {
        "screen_deep_learning"
    }

    fn max_iterations(&self) -> Option<usize> {
        Some(1)
    }

    fn validate(&self, _ctx: &BuildContext<'_>) -> Result<(), PipelineError> {
        for (name, value) in [
            ("true_particles", &self.true_particles),
            ("negatives", &self.negatives),
            ("particles", &self.particles),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::invalid(format!(
                    "screen_deep_learning requires '{}'",
                    name
                )));
            }
        }
        if self.epochs <= 0.0 || self.learning_rate <= 0.0 {
            return Err(PipelineError::invalid("epochs and learning_rate must be positive"));
        }
        Ok(())
    }

    fn setup_steps(&self, ctx: &BuildContext<'_>) -> Result<Vec<StepDraft>, PipelineError> {
        Ok(vec![StepDraft::from_operation(
            Operation::new("convert_input")
                .arg("output_dir", ctx.working_dir.join("data").display().to_string())
                .inputs([
                    self.true_particles.as_str(),
                    self.negatives.as_str(),
                    self.particles.as_str(),
                ]),
        )])
    }

    fn iteration_steps(
        &self,
        _iteration: usize,
        ctx: &BuildContext<'_>,
    ) -> Result<Vec<StepDraft>, PipelineError> {
        let model = ctx.working_dir.join("model").display().to_string();
        Ok(vec![
            StepDraft::from_operation(
                Operation::new("train")
                    .arg("epochs", self.epochs)
                    .arg("learning_rate", self.learning_rate)
                    .arg("model", model.as_str())
                    .inputs([self.true_particles.as_str(), self.negatives.as_str()]),
            ),
            StepDraft::from_operation(
                Operation::new("predict")
                    .arg("model", model)
                    .input(self.particles.as_str()),
            ),
        ])
    }

    fn finalize_steps(&self, ctx: &BuildContext<'_>) -> Result<Vec<StepDraft>, PipelineError> {
        Ok(vec![StepDraft::from_operation(
            Operation::new("create_output")
                .arg("output_dir", ctx.working_dir.display().to_string()),
        )])
    }
}
