//! Image similarity and quality metrics
//!
//! - [`similarity`]: mutual information, KL divergence and normalised
//!   cross-correlation from a joint histogram
//! - [`ssim`]: 3D SSIM and PSNR, whole-image and inside a mask
//! - [`report`]: CSV tables with one row per compared image

pub mod report;
pub mod similarity;
pub mod ssim;

pub use report::CsvReport;
pub use similarity::{
    calculate_similarity, entropy_measures, normalized_cross_correlation, SimilarityParams, SimilarityScores,
};
pub use ssim::{image_quality, psnr, ssim_map, QualityScores, SsimParams};
