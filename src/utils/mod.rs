//! Shared numerical helpers
//!
//! - `smoothing`: separable Gaussian and box filters
//! - `threshold`: Otsu threshold selection

pub mod smoothing;
pub mod threshold;

pub use smoothing::{gaussian_smooth_3d, uniform_filter_3d, Boundary};
pub use threshold::otsu_threshold;
