//! SSIM and PSNR of an image against a reference, optionally inside a mask.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use nii_superres::error::{check_input_file, check_output_dir};
use nii_superres::logging;
use nii_superres::metrics::{image_quality, CsvReport, QualityScores, SsimParams};
use nii_superres::nifti_io::{read_mask_file, read_nifti_file};
use nii_superres::orientation::reorient_like;

#[derive(Parser, Debug)]
#[command(name = "ssim_psnr")]
#[command(version)]
struct Args {
    #[arg(long)]
    reference: PathBuf,

    #[arg(long)]
    image: PathBuf,

    #[arg(long)]
    reference_mask: Option<PathBuf>,

    #[arg(long)]
    output_file: PathBuf,

    /// Compare voxel arrays as stored, without matching the reference orientation
    #[arg(long)]
    no_reorient: bool,

    #[arg(long, default_value_t = 1.5)]
    ssim_sigma: f64,

    /// Use a 7x7x7 uniform window instead of a Gaussian
    #[arg(long)]
    ssim_non_gaussian_weights: bool,

    #[arg(long)]
    ssim_use_sample_covariance: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    check_input_file(&args.reference, "input reference")?;
    check_input_file(&args.image, "input image")?;
    check_output_dir(&args.output_file)?;
    if let Some(mask) = &args.reference_mask {
        check_input_file(mask, "reference mask image")?;
    }

    let reference = read_nifti_file(&args.reference).with_context(|| format!("reading {}", args.reference.display()))?;
    let mask = args.reference_mask.as_deref().map(read_mask_file).transpose()?;
    let mut image = read_nifti_file(&args.image).with_context(|| format!("reading {}", args.image.display()))?;
    if !args.no_reorient {
        image = reorient_like(&image, &reference.grid)?;
        debug!(dims = ?image.dims(), "reoriented image to reference");
    }

    let params = SsimParams {
        sigma: args.ssim_sigma,
        gaussian_weights: !args.ssim_non_gaussian_weights,
        use_sample_covariance: args.ssim_use_sample_covariance,
    };
    let scores = image_quality(&reference, &image, mask.as_ref(), &params)?;

    let mut report = CsvReport::new(QualityScores::columns(mask.is_some()).as_slice());
    report.push(
        &args.reference.display().to_string(),
        &args.image.display().to_string(),
        scores.values(),
    )?;
    report.write(&args.output_file)?;
    info!("PSNR and SSIM saved in {}", args.output_file.display());
    Ok(())
}
