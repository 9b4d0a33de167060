//! Histogram-based similarity: mutual information, KL divergence, NCC

use crate::error::{Error, Result};
use crate::volume::{Mask, Volume};

pub const DEFAULT_BINS: usize = 16;

/// Percentile and scale of the robust histogram upper bound
const ROBUST_PERCENTILE: f64 = 99.75;
const ROBUST_SCALE: f64 = 1.2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityParams {
    /// Histogram bins per axis (default 16)
    pub bins: usize,
    /// Bound each histogram axis to [0, 1.2 * 99.75th percentile]
    pub robust_max: bool,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self { bins: DEFAULT_BINS, robust_max: false }
    }
}

/// Scores of one image against the reference
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityScores {
    pub mi: f64,
    /// KL(reference || image) of the marginals
    pub kl_ref_image: f64,
    /// KL(image || reference) of the marginals
    pub kl_image_ref: f64,
    pub ncc: f64,
}

impl SimilarityScores {
    pub const COLUMNS: [&'static str; 4] = ["MI", "KL1", "KL2", "NCC"];

    pub fn values(&self) -> Vec<f64> {
        vec![self.mi, self.kl_ref_image, self.kl_image_ref, self.ncc]
    }
}

/// Linear-interpolated percentile, `q` in [0, 100]
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn axis_range(values: &[f64]) -> (f64, f64) {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() {
        (0.0, 1.0)
    } else if lo == hi {
        (lo - 0.5, hi + 0.5)
    } else {
        (lo, hi)
    }
}

#[inline]
fn bin_of(v: f64, (lo, hi): (f64, f64), bins: usize) -> Option<usize> {
    if !(v >= lo && v <= hi) {
        return None;
    }
    if v == hi {
        return Some(bins - 1);
    }
    let bin = ((v - lo) / (hi - lo) * bins as f64) as usize;
    Some(bin.min(bins - 1))
}

/// Joint histogram, row-major with `x` along rows
///
/// Equal-width bins over `range` (or each axis' min/max); the last bin is
/// closed. Pairs outside the range or with a non-finite value are dropped.
pub fn histogram2d(x: &[f64], y: &[f64], bins: usize, range: Option<[(f64, f64); 2]>) -> Vec<f64> {
    let [rx, ry] = range.unwrap_or_else(|| {
        let fx: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
        let fy: Vec<f64> = y.iter().copied().filter(|v| v.is_finite()).collect();
        [axis_range(&fx), axis_range(&fy)]
    });
    let mut hist = vec![0.0; bins * bins];
    for (&a, &b) in x.iter().zip(y) {
        if let (Some(i), Some(j)) = (bin_of(a, rx, bins), bin_of(b, ry, bins)) {
            hist[i * bins + j] += 1.0;
        }
    }
    hist
}

/// Mutual information of `x` and `y` and the KL divergences between their marginals
///
/// Returns `(mi, (kl_xy, kl_yx))`, natural log.
pub fn entropy_measures(x: &[f64], y: &[f64], bins: usize, range: Option<[(f64, f64); 2]>) -> (f64, (f64, f64)) {
    let hist = histogram2d(x, y, bins, range);
    let total: f64 = hist.iter().sum();
    if total == 0.0 {
        return (0.0, (0.0, 0.0));
    }
    let pxy: Vec<f64> = hist.iter().map(|&h| h / total).collect();
    let px: Vec<f64> = (0..bins).map(|i| pxy[i * bins..(i + 1) * bins].iter().sum()).collect();
    let py: Vec<f64> = (0..bins).map(|j| (0..bins).map(|i| pxy[i * bins + j]).sum()).collect();

    let mut mi = 0.0;
    for i in 0..bins {
        for j in 0..bins {
            let p = pxy[i * bins + j];
            if p > 0.0 {
                mi += p * (p / (px[i] * py[j])).ln();
            }
        }
    }

    let mut kl_xy = 0.0;
    let mut kl_yx = 0.0;
    for (&a, &b) in px.iter().zip(&py) {
        if a > 0.0 && b > 0.0 {
            kl_xy += a * (a / b).ln();
            kl_yx += b * (b / a).ln();
        }
    }
    (mi, (kl_xy, kl_yx))
}

/// Absolute Pearson correlation; 0 when either signal is constant
pub fn normalized_cross_correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let mx = x[..n].iter().sum::<f64>() / n as f64;
    let my = y[..n].iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x[..n].iter().zip(&y[..n]) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return 0.0;
    }
    (sxy * sxy / (sxx * syy)).sqrt()
}

/// Voxel values inside `mask`, or all voxels
pub fn masked_values(volume: &Volume, mask: Option<&Mask>) -> Vec<f64> {
    match mask {
        Some(m) => volume
            .data
            .iter()
            .zip(&m.data)
            .filter(|(_, &inside)| inside != 0)
            .map(|(&v, _)| v)
            .collect(),
        None => volume.data.clone(),
    }
}

fn robust_upper(values: &[f64]) -> f64 {
    percentile(values, ROBUST_PERCENTILE) * ROBUST_SCALE
}

/// Score every image against `reference`, restricted to `mask` when given
pub fn calculate_similarity(
    reference: &Volume,
    images: &[Volume],
    mask: Option<&Mask>,
    params: &SimilarityParams,
) -> Result<Vec<SimilarityScores>> {
    if params.bins == 0 {
        return Err(Error::Configuration("number of histogram bins must be positive".to_string()));
    }
    if let Some(m) = mask {
        if !m.grid.same_shape(&reference.grid) {
            return Err(Error::Configuration(format!(
                "mask shape {:?} does not match reference shape {:?}",
                m.grid.dims,
                reference.dims()
            )));
        }
    }
    let ref_values = masked_values(reference, mask);
    let ref_max = robust_upper(&ref_values);

    images
        .iter()
        .map(|image| {
            if !image.grid.same_shape(&reference.grid) {
                return Err(Error::Configuration(format!(
                    "image shape {:?} does not match reference shape {:?}",
                    image.dims(),
                    reference.dims()
                )));
            }
            let values = masked_values(image, mask);
            let range = params.robust_max.then(|| [(0.0, ref_max), (0.0, robust_upper(&values))]);
            let (mi, (kl_ref_image, kl_image_ref)) = entropy_measures(&ref_values, &values, params.bins, range);
            Ok(SimilarityScores {
                mi,
                kl_ref_image,
                kl_image_ref,
                ncc: normalized_cross_correlation(&ref_values, &values),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Grid;

    fn ramp(n: usize, scale: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * scale).collect()
    }

    #[test]
    fn test_percentile_linear() {
        let v = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 50.0), 3.0);
        assert_eq!(percentile(&v, 100.0), 5.0);
        assert!((percentile(&v, 62.5) - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_histogram_last_bin_closed() {
        let x = vec![0.0, 0.5, 1.0];
        let hist = histogram2d(&x, &x, 2, None);
        assert_eq!(hist, vec![1.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_histogram_drops_out_of_range() {
        let x = vec![-1.0, 0.5, 2.0];
        let hist = histogram2d(&x, &x, 2, Some([(0.0, 1.0), (0.0, 1.0)]));
        assert_eq!(hist.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_identical_signals() {
        let x = ramp(1000, 0.01);
        let (mi, (kl1, kl2)) = entropy_measures(&x, &x, 16, None);
        // Uniform over 16 bins: MI equals the marginal entropy
        assert!((mi - (16.0f64).ln()).abs() < 0.01, "mi = {}", mi);
        assert!(kl1.abs() < 1e-12 && kl2.abs() < 1e-12);
        assert!((normalized_cross_correlation(&x, &x) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_independent_signals_low_mi() {
        let x: Vec<f64> = (0..4096).map(|i| (i % 64) as f64).collect();
        let y: Vec<f64> = (0..4096).map(|i| (i / 64) as f64).collect();
        let (mi, _) = entropy_measures(&x, &y, 16, None);
        assert!(mi.abs() < 1e-10, "mi = {}", mi);
    }

    #[test]
    fn test_ncc_is_absolute_and_scale_invariant() {
        let x = ramp(50, 1.0);
        let neg: Vec<f64> = x.iter().map(|v| -3.0 * v + 7.0).collect();
        assert!((normalized_cross_correlation(&x, &neg) - 1.0).abs() < 1e-12);
        assert_eq!(normalized_cross_correlation(&x, &vec![2.0; 50]), 0.0);
    }

    #[test]
    fn test_kl_of_shifted_marginals() {
        let x = vec![0.0, 0.0, 0.0, 1.0];
        let y = vec![0.0, 1.0, 1.0, 1.0];
        let (_, (kl_xy, kl_yx)) = entropy_measures(&x, &y, 2, None);
        let expected = 0.75 * (3.0f64).ln() + 0.25 * (1.0f64 / 3.0).ln();
        assert!((kl_xy - expected).abs() < 1e-12);
        assert!((kl_yx - expected).abs() < 1e-12);
    }

    #[test]
    fn test_calculate_similarity_with_mask() {
        let grid = Grid::with_spacing((4, 4, 4), (1.0, 1.0, 1.0));
        let reference = Volume::new(grid.clone(), ramp(64, 1.0)).unwrap();
        let mut noisy = reference.data.clone();
        noisy[0] = 1000.0;
        let image = Volume::new(grid.clone(), noisy).unwrap();
        let mask = Mask::new(grid, (0..64).map(|i| (i > 0) as u8).collect()).unwrap();

        let params = SimilarityParams::default();
        let unmasked = calculate_similarity(&reference, &[image.clone()], None, &params).unwrap();
        let masked = calculate_similarity(&reference, &[image], Some(&mask), &params).unwrap();
        assert!(unmasked[0].ncc < 0.5);
        assert!((masked[0].ncc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_robust_max_changes_range() {
        let grid = Grid::with_spacing((10, 10, 10), (1.0, 1.0, 1.0));
        let mut data = ramp(1000, 0.1);
        data[999] = 1e6;
        let reference = Volume::new(grid, data).unwrap();

        let plain = calculate_similarity(&reference, &[reference.clone()], None, &SimilarityParams::default()).unwrap();
        let robust = calculate_similarity(
            &reference,
            &[reference.clone()],
            None,
            &SimilarityParams { robust_max: true, ..Default::default() },
        )
        .unwrap();
        // The outlier squeezes everything into one bin unless the range is robust
        assert!(plain[0].mi < 0.01);
        assert!(robust[0].mi > 2.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Volume::filled(Grid::with_spacing((2, 2, 2), (1.0, 1.0, 1.0)), 1.0);
        let b = Volume::filled(Grid::with_spacing((3, 2, 2), (1.0, 1.0, 1.0)), 1.0);
        assert!(matches!(
            calculate_similarity(&a, &[b], None, &SimilarityParams::default()),
            Err(Error::Configuration(_))
        ));
    }
}
