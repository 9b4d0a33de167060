//! Fuse already-aligned images on the grid of the first one.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use nii_superres::error::{check_input_file, check_output_dir};
use nii_superres::fusion::{fuse, FbaParams, FusionKind, FusionMethod, DEFAULT_FBA_P, DEFAULT_FBA_SIGMA};
use nii_superres::logging;
use nii_superres::nifti_io::{read_nifti_file, save_nifti_to_file};

/// Combine co-registered images by averaging, median or FBA
#[derive(Parser, Debug)]
#[command(name = "combine_images")]
#[command(version)]
struct Args {
    #[arg(long, num_args = 1.., required = true)]
    inputs: Vec<PathBuf>,

    #[arg(long)]
    output: PathBuf,

    #[arg(long, value_enum, default_value_t = FusionKind::Average)]
    method: FusionKind,

    /// FBA weight exponent
    #[arg(long, default_value_t = DEFAULT_FBA_P)]
    fba_p: f64,

    /// FBA magnitude smoothing sigma, in frequency bins
    #[arg(long, default_value_t = DEFAULT_FBA_SIGMA)]
    fba_sigma: f64,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    for input in &args.inputs {
        check_input_file(input, "input image")?;
    }
    check_output_dir(&args.output)?;

    info!("Loading {} input images", args.inputs.len());
    let volumes = args
        .inputs
        .iter()
        .map(|p| {
            debug!(path = %p.display(), "loading");
            read_nifti_file(p).with_context(|| format!("reading {}", p.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let method = FusionMethod::from_kind(args.method, FbaParams { p: args.fba_p, sigma: args.fba_sigma });
    let fused = fuse(&volumes, None, &method)?;

    save_nifti_to_file(&args.output, &fused).with_context(|| format!("writing {}", args.output.display()))?;
    info!("Output image saved in {}", args.output.display());
    Ok(())
}
