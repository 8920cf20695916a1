//! Iterative 3D refinement by projection matching

use super::{BuildContext, Protocol, StepDraft};
use crate::core::error::PipelineError;
use crate::core::expand::PerIteration;
use crate::core::step::Operation;
use serde::{Deserialize, Serialize};

/// 3D reconstruction algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionMethod {
    Fourier,
    Art,
    Wbp,
}

impl ReconstructionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconstructionMethod::Fourier => "fourier",
            ReconstructionMethod::Art => "art",
            ReconstructionMethod::Wbp => "wbp",
        }
    }
}

/// Projection matching parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionMatching {
    /// Selection file with the input images
    pub sel_file: String,
    /// Optional document file with initial angles and shifts
    pub doc_file: Option<String>,
    /// Initial reference volumes; one class per volume
    pub reference_volumes: Vec<String>,

    pub do_ctf_correction: bool,
    pub ctf_dat_file: Option<String>,
    pub do_auto_ctf_group: bool,
    pub ctf_group_max_diff: f64,
    pub ctf_group_max_resol: f64,
    pub split_defocus_doc_file: Option<String>,
    pub padding_factor: u32,
    pub wiener_constant: f64,
    pub data_are_phase_flipped: bool,
    pub reference_is_ctf_corrected: PerIteration,

    pub do_mask: bool,
    pub do_spherical_mask: bool,
    pub mask_radius: u32,
    pub mask_file: Option<String>,

    pub inner_radius: PerIteration,
    pub outer_radius: PerIteration,
    pub ang_sampling_rate_deg: PerIteration,
    pub max_change_in_angles: PerIteration,
    pub perturb_projection_directions: PerIteration,
    pub max_change_offset: PerIteration,
    pub search_5d_shift: PerIteration,
    pub search_5d_step: PerIteration,
    /// Restrict the search to tilt angles in `[tilt0, tilt_f]`
    pub restrict_tilt: Option<(f64, f64)>,
    pub symmetry_group: String,
    pub only_winner: PerIteration,
    pub minimum_cross_correlation: PerIteration,
    pub discard_percentage: PerIteration,

    pub do_align2d: PerIteration,
    pub align2d_iterations: PerIteration,
    pub align2d_max_change_offset: PerIteration,
    pub align2d_max_change_rot: PerIteration,

    pub reconstruction_method: ReconstructionMethod,
    pub art_lambda: PerIteration,
    /// Only used by the first Fourier reconstruction
    pub fourier_max_frequency_of_interest: f64,
    pub reconstruction_extra_args: Option<String>,

    pub do_compute_resolution: PerIteration,
    pub do_split_reference_images: PerIteration,
    pub resol_sam: f64,

    pub do_low_pass_filter: bool,
    pub use_fsc_for_filter: bool,
    pub constant_to_add_to_filtration: PerIteration,
    pub do_center_volume: bool,

    /// Remove intermediate files after the final iteration
    pub clean_up_files: bool,
}

impl Default for ProjectionMatching {
    fn default() -> Self {
        Self {
            sel_file: String::new(),
            doc_file: None,
            reference_volumes: Vec::new(),
            do_ctf_correction: false,
            ctf_dat_file: None,
            do_auto_ctf_group: true,
            ctf_group_max_diff: 0.1,
            ctf_group_max_resol: 5.6,
            split_defocus_doc_file: None,
            padding_factor: 2,
            wiener_constant: -1.0,
            data_are_phase_flipped: true,
            reference_is_ctf_corrected: "1".into(),
            do_mask: true,
            do_spherical_mask: true,
            mask_radius: 64,
            mask_file: None,
            inner_radius: "0".into(),
            outer_radius: "64".into(),
            ang_sampling_rate_deg: "1 3 2 1".into(),
            max_change_in_angles: "1000 10 4 2".into(),
            perturb_projection_directions: "0".into(),
            max_change_offset: "1000 10 5".into(),
            search_5d_shift: "4x5 0".into(),
            search_5d_step: "2".into(),
            restrict_tilt: None,
            symmetry_group: "c1".to_string(),
            only_winner: "0".into(),
            minimum_cross_correlation: "-1".into(),
            discard_percentage: "10".into(),
            do_align2d: "0".into(),
            align2d_iterations: "4".into(),
            align2d_max_change_offset: "2x1000 2x10".into(),
            align2d_max_change_rot: "2x1000 2x20".into(),
            reconstruction_method: ReconstructionMethod::Fourier,
            art_lambda: "0.2".into(),
            fourier_max_frequency_of_interest: 0.25,
            reconstruction_extra_args: None,
            do_compute_resolution: "1".into(),
            do_split_reference_images: "1".into(),
            resol_sam: 5.6,
            do_low_pass_filter: true,
            use_fsc_for_filter: true,
            constant_to_add_to_filtration: "0.1".into(),
            do_center_volume: false,
            clean_up_files: false,
        }
    }
}

impl ProjectionMatching {
    /// Volumes refined in `iteration`: the initial references first, then the
    /// previous iteration's reconstructions
    fn references(&self, iteration: usize, ctx: &BuildContext<'_>) -> Vec<String> {
        if iteration == 1 {
            return self.reference_volumes.clone();
        }
        (1..=self.reference_volumes.len())
            .map(|r| ctx.iteration_file(iteration - 1, &format!("reference_ref{:02}.vol", r)))
            .collect()
    }

    fn images_file(&self, ctx: &BuildContext<'_>) -> String {
        ctx.working_dir.join("images.xmd").display().to_string()
    }
}

impl Protocol for ProjectionMatching {
    fn kind(&self) -> &'static str {
        "projection_matching"
    }

    fn per_iteration(&self) -> Vec<(&'static str, &PerIteration)> {
        vec![
            ("reference_is_ctf_corrected", &self.reference_is_ctf_corrected),
            ("inner_radius", &self.inner_radius),
            ("outer_radius", &self.outer_radius),
            ("ang_sampling_rate_deg", &self.ang_sampling_rate_deg),
            ("max_change_in_angles", &self.max_change_in_angles),
            ("perturb_projection_directions", &self.perturb_projection_directions),
            ("max_change_offset", &self.max_change_offset),
            ("search_5d_shift", &self.search_5d_shift),
            ("search_5d_step", &self.search_5d_step),
            ("only_winner", &self.only_winner),
            ("minimum_cross_correlation", &self.minimum_cross_correlation),
            ("discard_percentage", &self.discard_percentage),
            ("do_align2d", &self.do_align2d),
            ("align2d_iterations", &self.align2d_iterations),
            ("align2d_max_change_offset", &self.align2d_max_change_offset),
            ("align2d_max_change_rot", &self.align2d_max_change_rot),
            ("art_lambda", &self.art_lambda),
            ("do_compute_resolution", &self.do_compute_resolution),
            ("do_split_reference_images", &self.do_split_reference_images),
            ("constant_to_add_to_filtration", &self.constant_to_add_to_filtration),
        ]
    }

    fn validate(&self, ctx: &BuildContext<'_>) -> Result<(), PipelineError> {
        if self.sel_file.trim().is_empty() {
            return Err(PipelineError::invalid("projection_matching requires a sel_file"));
        }
        if self.reference_volumes.is_empty() {
            return Err(PipelineError::invalid(
                "projection_matching requires at least one reference volume",
            ));
        }
        if self.do_ctf_correction && self.ctf_dat_file.is_none() {
            return Err(PipelineError::invalid("CTF correction requires a ctf_dat_file"));
        }
        if self.do_ctf_correction && ctx.any_on("do_align2d") {
            return Err(PipelineError::invalid(
                "2D re-alignment requires CTF correction to be disabled",
            ));
        }
        if self.do_mask && !self.do_spherical_mask && self.mask_file.is_none() {
            return Err(PipelineError::invalid("a non-spherical mask requires a mask_file"));
        }
        if self.reconstruction_method != ReconstructionMethod::Fourier {
            for i in 1..=ctx.iterations {
                if !ctx.is_on("do_split_reference_images", i)? {
                    return Err(PipelineError::invalid(format!(
                        "iteration {}: unsplit reference images are only supported by fourier \
                         reconstruction, not {}",
                        i,
                        self.reconstruction_method.as_str()
                    )));
                }
            }
        }
        if let Some((tilt0, tilt_f)) = self.restrict_tilt {
            if tilt0 > tilt_f {
                return Err(PipelineError::invalid(format!(
                    "restrict_tilt lower bound {} exceeds upper bound {}",
                    tilt0, tilt_f
                )));
            }
        }
        Ok(())
    }

    fn setup_steps(&self, ctx: &BuildContext<'_>) -> Result<Vec<StepDraft>, PipelineError> {
        let mut convert = Operation::new("convert_input")
            .arg("output", self.images_file(ctx))
            .input(self.sel_file.as_str());
        if let Some(doc) = &self.doc_file {
            convert = convert.arg("doc_file", doc.as_str());
        }
        let mut steps = vec![StepDraft::from_operation(convert)];

        if self.do_ctf_correction {
            let ctf_dat = self.ctf_dat_file.as_deref().unwrap_or_default();
            let mut op = Operation::new("ctf_groups")
                .arg("ctf_dat", ctf_dat)
                .arg("auto_group", self.do_auto_ctf_group)
                .arg("max_diff", self.ctf_group_max_diff)
                .arg("max_resol", self.ctf_group_max_resol)
                .arg("padding", self.padding_factor as i64)
                .arg("wiener", self.wiener_constant)
                .arg("phase_flipped", self.data_are_phase_flipped)
                .arg("output", ctx.working_dir.join("CtfGroups").display().to_string());
            if let Some(split) = &self.split_defocus_doc_file {
                op = op.arg("split_defocus", split.as_str());
            }
            steps.push(StepDraft::from_operation(op));
        }

        Ok(steps)
    }

    fn iteration_steps(
        &self,
        iteration: usize,
        ctx: &BuildContext<'_>,
    ) -> Result<Vec<StepDraft>, PipelineError> {
        let i = iteration;
        let refs = self.references(i, ctx);
        let value = |name: &str| ctx.value(name, i).cloned();
        let mut steps = Vec::new();

        if self.do_mask {
            let mut op = Operation::new("mask_reference")
                .arg("output_dir", ctx.iteration_dir(i).display().to_string())
                .inputs(refs.iter().cloned())
                .fan_out();
            op = if self.do_spherical_mask {
                op.arg("radius", self.mask_radius as i64)
            } else {
                op.arg("mask", self.mask_file.as_deref().unwrap_or_default())
            };
            steps.push(StepDraft::from_operation(op));
        }

        let mut library = Operation::new("projection_library")
            .arg("sampling_rate", value("ang_sampling_rate_deg")?)
            .arg("max_change_in_angles", value("max_change_in_angles")?)
            .arg("perturb", value("perturb_projection_directions")?)
            .arg("symmetry", self.symmetry_group.as_str())
            .arg("output_dir", ctx.iteration_dir(i).display().to_string())
            .inputs(refs.iter().cloned())
            .fan_out();
        if let Some((tilt0, tilt_f)) = self.restrict_tilt {
            library = library.arg("tilt0", tilt0).arg("tiltF", tilt_f);
        }
        steps.push(StepDraft::from_operation(library));

        let mut matching = Operation::new("projection_matching")
            .arg("images", self.images_file(ctx))
            .arg("inner_radius", value("inner_radius")?)
            .arg("outer_radius", value("outer_radius")?)
            .arg("max_change_offset", value("max_change_offset")?)
            .arg("search5d_shift", value("search_5d_shift")?)
            .arg("search5d_step", value("search_5d_step")?)
            .arg("output", ctx.iteration_file(i, "angles.doc"))
            .inputs(refs.iter().cloned())
            .fan_out();
        if self.do_ctf_correction {
            matching = matching
                .arg("ctf_groups", ctx.working_dir.join("CtfGroups").display().to_string())
                .arg("reference_is_ctf_corrected", value("reference_is_ctf_corrected")?);
        }
        steps.push(StepDraft::from_operation(matching));

        steps.push(StepDraft::from_operation(
            Operation::new("discard_images")
                .arg("angles", ctx.iteration_file(i, "angles.doc"))
                .arg("only_winner", value("only_winner")?)
                .arg("min_cross_correlation", value("minimum_cross_correlation")?)
                .arg("discard_percentage", value("discard_percentage")?),
        ));

        if ctx.is_on("do_align2d", i)? {
            steps.push(StepDraft::from_operation(
                Operation::new("align2d")
                    .arg("angles", ctx.iteration_file(i, "angles.doc"))
                    .arg("iterations", value("align2d_iterations")?)
                    .arg("max_change_offset", value("align2d_max_change_offset")?)
                    .arg("max_change_rot", value("align2d_max_change_rot")?),
            ));
        }

        let mut reconstruct = Operation::new("reconstruct")
            .arg("method", self.reconstruction_method.as_str())
            .arg("angles", ctx.iteration_file(i, "angles.doc"))
            .arg("symmetry", self.symmetry_group.as_str())
            .arg("output_dir", ctx.iteration_dir(i).display().to_string())
            .inputs(refs.iter().cloned())
            .fan_out();
        match self.reconstruction_method {
            ReconstructionMethod::Art => {
                reconstruct = reconstruct.arg("lambda", value("art_lambda")?);
            }
            ReconstructionMethod::Fourier if i == 1 => {
                reconstruct = reconstruct.arg("max_resolution", self.fourier_max_frequency_of_interest);
            }
            _ => {}
        }
        if let Some(extra) = &self.reconstruction_extra_args {
            reconstruct = reconstruct.arg("extra", extra.as_str());
        }
        steps.push(StepDraft::from_operation(reconstruct));

        if ctx.is_on("do_compute_resolution", i)? {
            steps.push(StepDraft::from_operation(
                Operation::new("compute_resolution")
                    .arg("split_references", ctx.is_on("do_split_reference_images", i)?)
                    .arg("sampling", self.resol_sam)
                    .arg("output", ctx.iteration_file(i, "resolution.fsc"))
                    .inputs(refs.iter().cloned()),
            ));
        }

        if self.do_low_pass_filter {
            steps.push(StepDraft::from_operation(
                Operation::new("filter_volume")
                    .arg("use_fsc", self.use_fsc_for_filter)
                    .arg("constant", value("constant_to_add_to_filtration")?)
                    .arg("output_dir", ctx.iteration_dir(i).display().to_string()),
            ));
        }

        if self.do_center_volume {
            steps.push(StepDraft::from_operation(
                Operation::new("center_volume")
                    .arg("output_dir", ctx.iteration_dir(i).display().to_string()),
            ));
        }

        Ok(steps)
    }

    fn finalize_steps(&self, ctx: &BuildContext<'_>) -> Result<Vec<StepDraft>, PipelineError> {
        let last = self.references(ctx.iterations + 1, ctx);
        let mut steps = vec![StepDraft::from_operation(
            Operation::new("collect_results")
                .arg("output_dir", ctx.working_dir.display().to_string())
                .inputs(last),
        )];
        if self.clean_up_files {
            steps.push(StepDraft::from_operation(
                Operation::new("cleanup_intermediate")
                    .arg("working_dir", ctx.working_dir.display().to_string())
                    .arg("iterations", ctx.iterations as i64),
            ));
        }
        Ok(steps)
    }
}
