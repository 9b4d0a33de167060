//! Iterative alignment and fusion
//!
//! Every input is rigidly registered to a running reference, resampled onto
//! the template grid and fused; the fused volume becomes the reference for
//! the next iteration. Transforms found in one iteration seed the
//! registration of the same input in the next.
//!
//! Registration, resampling and brain extraction are capabilities passed in
//! by the caller, so the loop runs the same way against mrtrix3/hd-bet or
//! against in-process implementations.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::brain_mask::MaskExtractor;
use crate::error::{check_input_file, check_output_dir, Error, Result};
use crate::fusion::{fuse, replace_non_finite, FusionMethod};
use crate::nifti_io::save_nifti_to_file;
use crate::registration::{Registrar, RegistrationRequest};
use crate::resample::{resample_mask, Interpolation, Resampler};
use crate::transform::RigidTransform;
use crate::volume::{Grid, Mask, Volume};

/// What the first iteration registers against
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum InitialReference {
    /// The grid template image, with the first input's brain mask
    #[default]
    Grid,
    /// The first input image, with its own brain mask
    FirstInput,
}

#[derive(Clone, Debug)]
pub struct AlignCombineParams {
    /// Number of register-resample-fuse rounds (at least 1)
    pub iterations: usize,
    /// Kernel for intensities; masks are always resampled nearest-neighbour
    pub interpolation: Interpolation,
    pub fusion: FusionMethod,
    pub initial_reference: InitialReference,
    /// When set, each iteration's fused volume and transforms are written here
    pub debug_dir: Option<PathBuf>,
}

impl Default for AlignCombineParams {
    fn default() -> Self {
        Self {
            iterations: 3,
            interpolation: Interpolation::Cubic,
            fusion: FusionMethod::Average,
            initial_reference: InitialReference::Grid,
            debug_dir: None,
        }
    }
}

/// Loop state carried from one iteration to the next
#[derive(Clone, Debug)]
pub struct IterationState {
    /// Registration target; after the first iteration, the last fused volume
    pub reference: Volume,
    pub reference_mask: Option<Mask>,
    /// Per-input transforms from the previous iteration (empty before the first)
    pub transforms: Vec<RigidTransform>,
}

/// Input volume with its field-of-view mask, non-finite voxels zeroed
struct Prepared {
    volume: Volume,
    fov: Mask,
}

pub struct AlignCombine<R, S, M> {
    registrar: R,
    resampler: S,
    extractor: M,
    params: AlignCombineParams,
}

impl<R: Registrar, S: Resampler, M: MaskExtractor> AlignCombine<R, S, M> {
    pub fn new(registrar: R, resampler: S, extractor: M, params: AlignCombineParams) -> Self {
        Self { registrar, resampler, extractor, params }
    }

    pub fn params(&self) -> &AlignCombineParams {
        &self.params
    }

    /// Align and fuse `inputs` on the grid of `grid`
    pub fn run(&self, inputs: &[Volume], masks: Option<&[Mask]>, grid: &Volume) -> Result<Volume> {
        Ok(self.run_with_state(inputs, masks, grid)?.reference)
    }

    /// Like [`run`](Self::run), also returning the final transforms
    pub fn run_with_state(&self, inputs: &[Volume], masks: Option<&[Mask]>, grid: &Volume) -> Result<IterationState> {
        self.check(inputs, masks)?;
        info!(inputs = inputs.len(), iterations = self.params.iterations, "aligning and fusing");

        let prepared: Vec<Prepared> = inputs
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let fov = v.validity_mask();
                let (volume, replaced) = replace_non_finite(v.clone());
                if replaced > 0 {
                    debug!(input = i, voxels = replaced, "input has voxels outside its field of view");
                }
                Prepared { volume, fov }
            })
            .collect();

        let mut state = match self.params.initial_reference {
            InitialReference::FirstInput => IterationState {
                reference: prepared[0].volume.clone(),
                reference_mask: masks.map(|m| m[0].clone()),
                transforms: Vec::new(),
            },
            InitialReference::Grid => IterationState {
                reference: replace_non_finite(grid.clone()).0,
                reference_mask: masks.map(|m| m[0].clone()),
                transforms: Vec::new(),
            },
        };

        for t in 0..self.params.iterations {
            let template = if t == 0 { grid.grid.clone() } else { state.reference.grid.clone() };
            state = self.iterate(t, &state, &prepared, masks, &template)?;
        }
        Ok(state)
    }

    fn check(&self, inputs: &[Volume], masks: Option<&[Mask]>) -> Result<()> {
        if inputs.is_empty() {
            return Err(Error::Configuration("at least one input image is required".to_string()));
        }
        if self.params.iterations == 0 {
            return Err(Error::Configuration("number of iterations must be at least 1".to_string()));
        }
        if let Some(masks) = masks {
            if masks.len() != inputs.len() {
                return Err(Error::Configuration(format!(
                    "{} masks given for {} input images",
                    masks.len(),
                    inputs.len()
                )));
            }
            for (i, (mask, input)) in masks.iter().zip(inputs).enumerate() {
                if !mask.grid.same_shape(&input.grid) {
                    return Err(Error::Configuration(format!(
                        "mask {} has shape {:?}, input has {:?}",
                        i,
                        mask.grid.dims,
                        input.dims()
                    )));
                }
            }
        }
        Ok(())
    }

    fn iterate(
        &self,
        t: usize,
        state: &IterationState,
        prepared: &[Prepared],
        masks: Option<&[Mask]>,
        template: &Grid,
    ) -> Result<IterationState> {
        info!("Starting iteration {}", t + 1);

        let n = prepared.len();
        let mut transforms = Vec::with_capacity(n);
        let mut regridded = Vec::with_capacity(n);
        let mut fovs = Vec::with_capacity(n);

        for (i, input) in prepared.iter().enumerate() {
            let request = RegistrationRequest {
                index: i,
                moving: &input.volume,
                moving_mask: masks.map(|m| &m[i]),
                reference: &state.reference,
                reference_mask: state.reference_mask.as_ref(),
                init: state.transforms.get(i),
            };
            let transform = self.registrar.register(&request)?;
            debug!(input = i, translation = ?transform.translation(), "registered");

            regridded.push(self.resampler.resample(&input.volume, &transform, template, self.params.interpolation)?);
            fovs.push(resample_mask(&self.resampler, &input.fov, &transform, template)?);
            transforms.push(transform);
        }

        let fused = fuse(&regridded, Some(&fovs), &self.params.fusion)?;
        let (mut fused, replaced) = replace_non_finite(fused);
        if replaced > 0 {
            warn!(voxels = replaced, "non-finite fused voxels set to 0");
        }
        for v in fused.data.iter_mut() {
            *v = v.abs();
        }

        if let Some(dir) = &self.params.debug_dir {
            write_debug(dir, t, &fused, &transforms)?;
        }

        let remaining = t + 1 < self.params.iterations;
        let reference_mask = if masks.is_some() && remaining {
            let mask = self.extractor.extract(&fused)?;
            debug!(voxels = mask.count(), "refreshed reference mask");
            Some(mask)
        } else {
            None
        };

        Ok(IterationState { reference: fused, reference_mask, transforms })
    }
}

fn write_debug(dir: &Path, t: usize, fused: &Volume, transforms: &[RigidTransform]) -> Result<()> {
    save_nifti_to_file(&dir.join(format!("iteration{}.nii.gz", t + 1)), fused)?;
    for (i, transform) in transforms.iter().enumerate() {
        transform.write(&dir.join(format!("iteration{}_img{}.txt", t + 1, i)))?;
    }
    Ok(())
}

/// Check every path up front so no external tool runs on a bad invocation
pub fn validate_paths(inputs: &[PathBuf], grid: &Path, masks: Option<&[PathBuf]>, output: &Path) -> Result<()> {
    if inputs.is_empty() {
        return Err(Error::InputValidation("no input images given".to_string()));
    }
    for input in inputs {
        check_input_file(input, "input image")?;
    }
    check_input_file(grid, "grid image")?;
    if let Some(masks) = masks {
        if masks.len() != inputs.len() {
            return Err(Error::Configuration(format!(
                "{} masks given for {} input images",
                masks.len(),
                inputs.len()
            )));
        }
        for mask in masks {
            check_input_file(mask, "mask")?;
        }
    }
    check_output_dir(output)
}
