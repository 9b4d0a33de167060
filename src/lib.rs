//! nii-superres: multi-image alignment, fusion and image comparison
//!
//! This crate combines several low-resolution NIfTI acquisitions of the same
//! subject into one volume on a finer grid, and scores images against a
//! reference.
//!
//! # Modules
//! - `nifti_io`, `volume`: NIfTI reading/writing and in-memory volumes
//! - `transform`: rigid world-space transforms (mrtrix3 text format)
//! - `fft`: 3D FFT operations using rustfft
//! - `fusion`: average, median and frequency-domain (FBA) fusion
//! - `resample`, `registration`, `brain_mask`: capabilities used by the loop
//! - `external`: mrtrix3 and hd-bet behind those capabilities
//! - `pipeline`: iterative alignment-and-fusion
//! - `metrics`: MI, KL, NCC, SSIM, PSNR
//! - `orientation`: axis codes and reorientation
//! - `utils`: smoothing filters and thresholding

// Core modules
pub mod error;
pub mod fft;
pub mod transform;
pub mod volume;

// Algorithm modules
pub mod fusion;
pub mod metrics;
pub mod orientation;
pub mod pipeline;
pub mod utils;

// Capabilities
pub mod brain_mask;
pub mod external;
pub mod registration;
pub mod resample;

// I/O and tooling
pub mod logging;
pub mod nifti_io;

pub use error::{Error, Result};
pub use volume::{Grid, Mask, Volume};
