//! Orientation utilities for NIfTI images.
//!
//! Subcommands:
//! - `slice`: print the acquisition plane (TRA, SAG or COR)
//! - `canonical`: reorient to the closest RAS+ orientation
//! - `to-reference`: reorient to the voxel-axis order of a reference image

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use nii_superres::error::{check_input_file, check_output_dir};
use nii_superres::logging;
use nii_superres::nifti_io::{read_nifti_file, save_nifti_to_file};
use nii_superres::orientation::{
    as_closest_canonical, axcodes, inv_ornt_aff, io_orientation, ornt_transform, reorient_to_reference,
    slice_orientation, write_matrix, Orientation,
};

#[derive(Parser, Debug)]
#[command(name = "orientation")]
#[command(version)]
struct Args {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the slice orientation of an image
    Slice {
        #[arg(long)]
        input: PathBuf,
    },

    /// Reorient an image to RAS+
    Canonical {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Save the input-to-output voxel affine here
        #[arg(long)]
        ro_matrix: Option<PathBuf>,
    },

    /// Reorient an image to match a reference image
    ToReference {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        reference: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Save the input-to-reference voxel affine here
        #[arg(long)]
        ro_matrix: Option<PathBuf>,

        /// Keep the image origin and voxel sizes but take the reference rotation
        #[arg(long)]
        realign_grid: bool,
    },
}

fn codes(ornt: &Orientation) -> String {
    axcodes(ornt).iter().collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    match args.command {
        Command::Slice { input } => {
            check_input_file(&input, "input image")?;
            let volume = read_nifti_file(&input).with_context(|| format!("reading {}", input.display()))?;
            let ornt = io_orientation(&volume.grid.voxel_to_world())?;
            debug!(axcodes = %codes(&ornt), "image orientation");
            match slice_orientation(&ornt) {
                Some(plane) => println!("{}", plane),
                None => warn!("axis order {} is not transverse, sagittal or coronal", codes(&ornt)),
            }
        }

        Command::Canonical { input, output, ro_matrix } => {
            check_input_file(&input, "input image")?;
            check_output_dir(&output)?;
            let volume = read_nifti_file(&input).with_context(|| format!("reading {}", input.display()))?;
            let input_ornt = io_orientation(&volume.grid.voxel_to_world())?;
            println!("Image orientation: {}", codes(&input_ornt));

            let canonical = as_closest_canonical(&volume)?;
            let canonical_ornt = io_orientation(&canonical.grid.voxel_to_world())?;
            println!("Reference orientation: {}", codes(&canonical_ornt));
            save_nifti_to_file(&output, &canonical).with_context(|| format!("writing {}", output.display()))?;

            if let Some(path) = ro_matrix {
                let ref_to_input = ornt_transform(&canonical_ornt, &input_ornt)?;
                write_matrix(&path, &inv_ornt_aff(&ref_to_input, canonical.dims()))?;
                info!("Reorientation matrix saved in {}", path.display());
            }
        }

        Command::ToReference { input, reference, output, ro_matrix, realign_grid } => {
            check_input_file(&input, "input image")?;
            check_input_file(&reference, "reference image")?;
            check_output_dir(&output)?;
            let volume = read_nifti_file(&input).with_context(|| format!("reading {}", input.display()))?;
            let reference = read_nifti_file(&reference).with_context(|| format!("reading {}", reference.display()))?;
            info!(
                image = %codes(&io_orientation(&volume.grid.voxel_to_world())?),
                reference = %codes(&io_orientation(&reference.grid.voxel_to_world())?),
                "orientations"
            );

            let (reoriented, input_to_ref) = reorient_to_reference(&volume, &reference, realign_grid)?;
            save_nifti_to_file(&output, &reoriented).with_context(|| format!("writing {}", output.display()))?;
            if let Some(path) = ro_matrix {
                write_matrix(&path, &input_to_ref)?;
            }
        }
    }
    Ok(())
}
