//! Iterative alignment, upsampling and fusion of multiple images.
//!
//! Each iteration registers every input rigidly to the current reference,
//! resamples it onto the template grid and fuses the results. Registration
//! and resampling use mrtrix3 (`mrregister`, `mrtransform`); the reference
//! mask is refreshed with hd-bet between iterations when masks are given.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use nii_superres::brain_mask::{MaskExtractor, OtsuMask};
use nii_superres::external::{HdBet, MrtrixTools, Scratch};
use nii_superres::fusion::{FbaParams, FusionKind, FusionMethod, DEFAULT_FBA_P, DEFAULT_FBA_SIGMA};
use nii_superres::nifti_io::{read_mask_file, read_nifti_file, save_nifti_to_file};
use nii_superres::pipeline::{validate_paths, AlignCombine, AlignCombineParams, InitialReference};
use nii_superres::registration::{IdentityRegistrar, Registrar};
use nii_superres::resample::{GridResampler, Interpolation, Resampler};
use nii_superres::{logging, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Registration {
    /// mrregister -type rigid
    Mrtrix,
    /// Inputs are already aligned
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Resampling {
    /// mrtransform -linear -template
    Mrtrix,
    /// In-process resampler
    Internal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BrainMask {
    /// hd-bet
    HdBet,
    /// Otsu threshold of the fused image
    Otsu,
}

/// Perform iterative alignment, upsampling and averaging of multiple images
#[derive(Parser, Debug)]
#[command(name = "align_combine")]
#[command(version)]
struct Args {
    /// Input images, then the image with the template grid, then the output image
    #[arg(value_name = "INPUTS... GRID OUTPUT", num_args = 3.., required = true)]
    paths: Vec<PathBuf>,

    /// Brain masks of the input images, one per input
    #[arg(long, num_args = 1..)]
    masks: Option<Vec<PathBuf>>,

    /// Interpolation method
    #[arg(long, value_enum, default_value_t = Interpolation::Cubic)]
    interp: Interpolation,

    /// Number of iterations
    #[arg(long = "iter", default_value_t = 3)]
    iterations: usize,

    /// Fusion of the resampled images
    #[arg(long, value_enum, default_value_t = FusionKind::Average)]
    fusion: FusionKind,

    /// FBA weight exponent
    #[arg(long, default_value_t = DEFAULT_FBA_P)]
    fba_p: f64,

    /// FBA magnitude smoothing sigma, in frequency bins
    #[arg(long, default_value_t = DEFAULT_FBA_SIGMA)]
    fba_sigma: f64,

    /// Reference for the first iteration
    #[arg(long, value_enum, default_value_t = InitialReference::Grid)]
    initial_reference: InitialReference,

    #[arg(long, value_enum, default_value_t = Registration::Mrtrix)]
    registration: Registration,

    #[arg(long, value_enum, default_value_t = Resampling::Mrtrix)]
    resampling: Resampling,

    #[arg(long, value_enum, default_value_t = BrainMask::HdBet)]
    brain_mask: BrainMask,

    #[arg(long, default_value = "mrregister")]
    mrregister: String,

    #[arg(long, default_value = "mrtransform")]
    mrtransform: String,

    #[arg(long, default_value = "hd-bet")]
    hd_bet: String,

    /// Device passed to hd-bet
    #[arg(long, default_value = "cpu")]
    hd_bet_device: String,

    /// Parent directory for the scratch area
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Keep the scratch area after the run
    #[arg(long)]
    keep_scratch: bool,

    /// Write every iteration's fused image and transforms here
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Overwrite the output image if it exists
    #[arg(long)]
    force: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let (inputs, rest) = args.paths.split_at(args.paths.len() - 2);
    let (grid_path, output) = (&rest[0], &rest[1]);

    validate_paths(inputs, grid_path, args.masks.as_deref(), output)?;
    if output.exists() && !args.force {
        return Err(Error::InputValidation(format!(
            "output '{}' already exists (use --force to overwrite)",
            output.display()
        ))
        .into());
    }
    if let Some(dir) = &args.debug_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    if args.fusion == FusionKind::Fba && args.fba_sigma < 0.0 {
        bail!("--fba-sigma must not be negative");
    }

    info!("Number of input images: {}", inputs.len());
    let volumes = inputs
        .iter()
        .map(|p| read_nifti_file(p).with_context(|| format!("reading input {}", p.display())))
        .collect::<Result<Vec<_>>>()?;
    let masks = match &args.masks {
        Some(paths) => Some(
            paths
                .iter()
                .map(|p| read_mask_file(p).with_context(|| format!("reading mask {}", p.display())))
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    let grid = read_nifti_file(grid_path).with_context(|| format!("reading grid {}", grid_path.display()))?;
    info!(dims = ?grid.dims(), voxel_size = ?grid.grid.voxel_size, "template grid");

    let scratch = Scratch::new(args.scratch_dir.as_deref(), args.keep_scratch)?;
    let tools = MrtrixTools { mrregister: args.mrregister.clone(), mrtransform: args.mrtransform.clone() };

    let mr_register = tools.registrar(&scratch);
    let registrar: &dyn Registrar = match args.registration {
        Registration::Mrtrix => &mr_register,
        Registration::None => &IdentityRegistrar,
    };
    let mr_transform = tools.resampler(&scratch);
    let resampler: &dyn Resampler = match args.resampling {
        Resampling::Mrtrix => &mr_transform,
        Resampling::Internal => &GridResampler,
    };
    let mut hd_bet = HdBet::new(&scratch).with_program(args.hd_bet.clone());
    hd_bet.device = args.hd_bet_device.clone();
    let otsu = OtsuMask::default();
    let extractor: &dyn MaskExtractor = match args.brain_mask {
        BrainMask::HdBet => &hd_bet,
        BrainMask::Otsu => &otsu,
    };

    let params = AlignCombineParams {
        iterations: args.iterations,
        interpolation: args.interp,
        fusion: FusionMethod::from_kind(args.fusion, FbaParams { p: args.fba_p, sigma: args.fba_sigma }),
        initial_reference: args.initial_reference,
        debug_dir: args.debug_dir.clone(),
    };
    let pipeline = AlignCombine::new(registrar, resampler, extractor, params);
    let fused = pipeline.run(&volumes, masks.as_deref(), &grid)?;

    save_nifti_to_file(output, &fused).with_context(|| format!("writing {}", output.display()))?;
    info!("Output image saved in {}", output.display());
    Ok(())
}
