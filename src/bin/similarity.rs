//! Mutual information, KL divergence and NCC of images against a reference.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use nii_superres::error::{check_input_file, check_output_dir};
use nii_superres::logging;
use nii_superres::metrics::similarity::DEFAULT_BINS;
use nii_superres::metrics::{calculate_similarity, CsvReport, SimilarityParams, SimilarityScores};
use nii_superres::nifti_io::{read_mask_file, read_nifti_file};

#[derive(Parser, Debug)]
#[command(name = "similarity")]
#[command(version)]
struct Args {
    #[arg(short, long)]
    reference: PathBuf,

    #[arg(short, long, num_args = 1.., required = true)]
    images: Vec<PathBuf>,

    /// CSV file with one row per image
    #[arg(short, long)]
    output_file: PathBuf,

    /// Restrict all measures to this mask
    #[arg(short = 'm', long)]
    reference_mask: Option<PathBuf>,

    /// Histogram bins per axis
    #[arg(long, default_value_t = DEFAULT_BINS)]
    n_bins: usize,

    /// Bound histograms by 1.2x the 99.75th percentile instead of the maximum
    #[arg(long)]
    robust_max: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    check_input_file(&args.reference, "input reference")?;
    if let Some(mask) = &args.reference_mask {
        check_input_file(mask, "reference mask image")?;
    }
    for image in &args.images {
        check_input_file(image, "input image")?;
    }
    check_output_dir(&args.output_file)?;

    let reference = read_nifti_file(&args.reference).with_context(|| format!("reading {}", args.reference.display()))?;
    let mask = args.reference_mask.as_deref().map(read_mask_file).transpose()?;
    let images = args
        .images
        .iter()
        .map(|p| read_nifti_file(p).with_context(|| format!("reading {}", p.display())))
        .collect::<Result<Vec<_>>>()?;

    let params = SimilarityParams { bins: args.n_bins, robust_max: args.robust_max };
    let scores = calculate_similarity(&reference, &images, mask.as_ref(), &params)?;

    let reference_name = args.reference.display().to_string();
    let mut report = CsvReport::new(&SimilarityScores::COLUMNS);
    for (path, s) in args.images.iter().zip(&scores) {
        report.push(&reference_name, &path.display().to_string(), s.values())?;
    }
    report.write(&args.output_file)?;
    info!("Results saved in {}", args.output_file.display());
    Ok(())
}
