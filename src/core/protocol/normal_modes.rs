//! Normal mode analysis of an atomic or EM structure (single pass)

use super::{BuildContext, Protocol, StepDraft};
use crate::core::error::PipelineError;
use crate::core::step::Operation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureType {
    /// Electron density volume; converted to pseudo-atoms first
    Em,
    /// Atomic model
    Pdb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskMode {
    None,
    Threshold,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutoffMode {
    /// Interaction cut-off given as a distance percentile
    Relative,
    /// Interaction cut-off given in Angstroms
    Absolute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalModes {
    pub input_structure: String,
    pub structure_type: StructureType,
    pub sampling: f64,
    pub mask_mode: MaskMode,
    pub threshold: f64,
    pub mask_file: Option<String>,
    pub pseudo_atom_radius: f64,
    pub pseudo_atom_target: f64,
    pub number_of_modes: u32,
    pub cutoff_mode: CutoffMode,
    pub rc: f64,
    pub rc_percentage: f64,
    pub rtb_block_size: u32,
    pub rtb_force_constant: f64,
    pub amplitude: f64,
    pub n_frames: u32,
    pub downsample: u32,
    pub pseudo_atom_threshold: f64,
}

impl Default for NormalModes {
    fn default() -> Self {
        Self {
            input_structure: String::new(),
            structure_type: StructureType::Em,
            sampling: 1.0,
            mask_mode: MaskMode::None,
            threshold: 0.01,
            mask_file: None,
            pseudo_atom_radius: 1.0,
            pseudo_atom_target: 5.0,
            number_of_modes: 20,
            cutoff_mode: CutoffMode::Relative,
            rc: 8.0,
            rc_percentage: 95.0,
            rtb_block_size: 10,
            rtb_force_constant: 10.0,
            amplitude: 50.0,
            n_frames: 10,
            downsample: 1,
            pseudo_atom_threshold: 0.0,
        }
    }
}

impl NormalModes {
    fn atoms_file(&self, ctx: &BuildContext<'_>) -> String {
        match self.structure_type {
            StructureType::Em => ctx.working_dir.join("pseudoatoms.pdb").display().to_string(),
            StructureType::Pdb => self.input_structure.clone(),
        }
    }
}

impl Protocol for NormalModes {
    fn kind(&self) -> &'static str {
        "normal_modes"
    }

    fn max_iterations(&self) -> Option<usize> {
        Some(1)
    }

    fn validate(&self, _ctx: &BuildContext<'_>) -> Result<(), PipelineError> {
        if self.input_structure.trim().is_empty() {
            return Err(PipelineError::invalid("normal_modes requires an input_structure"));
        }
        if self.mask_mode == MaskMode::File && self.mask_file.is_none() {
            return Err(PipelineError::invalid("mask_mode 'file' requires a mask_file"));
        }
        if self.number_of_modes < 1 {
            return Err(PipelineError::invalid("number_of_modes must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.rc_percentage) {
            return Err(PipelineError::invalid(format!(
                "rc_percentage must be within 0..100, got {}",
                self.rc_percentage
            )));
        }
        Ok(())
    }

    fn setup_steps(&self, ctx: &BuildContext<'_>) -> Result<Vec<StepDraft>, PipelineError> {
        if self.structure_type != StructureType::Em {
            return Ok(Vec::new());
        }
        let mut op = Operation::new("convert_to_pseudoatoms")
            .arg("sampling", self.sampling)
            .arg("radius", self.pseudo_atom_radius)
            .arg("target_error", self.pseudo_atom_target)
            .arg("output", self.atoms_file(ctx))
            .input(self.input_structure.as_str());
        op = match self.mask_mode {
            MaskMode::None => op,
            MaskMode::Threshold => op.arg("threshold", self.threshold),
            MaskMode::File => op.arg("mask", self.mask_file.as_deref().unwrap_or_default()),
        };
        Ok(vec![StepDraft::from_operation(op)])
    }

    fn iteration_steps(
        &self,
        _iteration: usize,
        ctx: &BuildContext<'_>,
    ) -> Result<Vec<StepDraft>, PipelineError> {
        let modes_dir = ctx.working_dir.join("modes").display().to_string();
        let mut compute = Operation::new("compute_modes")
            .arg("modes", self.number_of_modes as i64)
            .arg("output_dir", modes_dir.as_str())
            .input(self.atoms_file(ctx));
        compute = match self.cutoff_mode {
            CutoffMode::Absolute => compute.arg("cutoff", self.rc),
            CutoffMode::Relative => compute.arg("cutoff_percentile", self.rc_percentage),
        };
        if self.structure_type == StructureType::Pdb {
            compute = compute
                .arg("rtb_block_size", self.rtb_block_size as i64)
                .arg("rtb_force_constant", self.rtb_force_constant);
        }

        let animate = Operation::new("animate_modes")
            .arg("amplitude", self.amplitude)
            .arg("frames", self.n_frames as i64)
            .arg("downsample", self.downsample as i64)
            .arg("threshold", self.pseudo_atom_threshold)
            .arg("modes_dir", modes_dir);

        Ok(vec![
            StepDraft::from_operation(compute),
            StepDraft::from_operation(animate),
        ])
    }

    fn finalize_steps(&self, ctx: &BuildContext<'_>) -> Result<Vec<StepDraft>, PipelineError> {
        Ok(vec![StepDraft::from_operation(
            Operation::new("create_output")
                .arg("output_dir", ctx.working_dir.display().to_string()),
        )])
    }
}
