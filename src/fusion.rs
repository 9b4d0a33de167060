//! Fusion of co-registered volumes
//!
//! Three interchangeable strategies combine N volumes of identical shape:
//! - average (optionally weighted per voxel by field-of-view masks)
//! - median
//! - frequency-domain fusion (FBA): each volume's spectrum is weighted by a
//!   smoothed, power-sharpened magnitude envelope, so every frequency is
//!   taken mostly from the source that carries the most energy there.

use num_complex::Complex64;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fft::Fft3dWorkspace;
use crate::utils::smoothing::{gaussian_smooth_3d, Boundary};
use crate::volume::{Mask, Volume};

pub const DEFAULT_FBA_P: f64 = 11.0;
pub const DEFAULT_FBA_SIGMA: f64 = 5.0;

/// Gaussian kernel extent, in standard deviations
const FBA_TRUNCATE: f64 = 4.0;

/// Parameters of frequency-domain fusion
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FbaParams {
    /// Exponent applied to the smoothed magnitude (default 11)
    pub p: f64,
    /// Gaussian sigma, in frequency bins, for smoothing the magnitude (default 5)
    pub sigma: f64,
}

impl Default for FbaParams {
    fn default() -> Self {
        Self { p: DEFAULT_FBA_P, sigma: DEFAULT_FBA_SIGMA }
    }
}

/// Command-line name of a fusion strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum FusionKind {
    Average,
    Median,
    Fba,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum FusionMethod {
    #[default]
    Average,
    Median,
    Fba(FbaParams),
}

impl FusionMethod {
    pub fn from_kind(kind: FusionKind, fba: FbaParams) -> Self {
        match kind {
            FusionKind::Average => FusionMethod::Average,
            FusionKind::Median => FusionMethod::Median,
            FusionKind::Fba => FusionMethod::Fba(fba),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FusionMethod::Average => "average",
            FusionMethod::Median => "median",
            FusionMethod::Fba(_) => "fba",
        }
    }
}

fn check_inputs(volumes: &[Volume], weights: Option<&[Mask]>) -> Result<()> {
    let first = volumes
        .first()
        .ok_or_else(|| Error::Configuration("fusion needs at least one volume".to_string()))?;
    let dims = first.dims();
    if let Some(v) = volumes.iter().find(|v| v.dims() != dims) {
        return Err(Error::Configuration(format!(
            "cannot fuse volumes of different shapes {:?} and {:?}",
            dims,
            v.dims()
        )));
    }
    if let Some(masks) = weights {
        if masks.len() != volumes.len() {
            return Err(Error::Configuration(format!(
                "{} weight masks supplied for {} volumes",
                masks.len(),
                volumes.len()
            )));
        }
        if let Some(m) = masks.iter().find(|m| m.grid.dims != dims) {
            return Err(Error::Configuration(format!(
                "weight mask shape {:?} does not match volume shape {:?}",
                m.grid.dims, dims
            )));
        }
    }
    Ok(())
}

/// Fuse co-registered volumes into one volume on the first input's grid
///
/// `weights` only affects the average strategy.
pub fn fuse(volumes: &[Volume], weights: Option<&[Mask]>, method: &FusionMethod) -> Result<Volume> {
    check_inputs(volumes, weights)?;
    debug!(method = method.name(), n = volumes.len(), masked = weights.is_some(), "fusing volumes");

    match (method, weights) {
        (FusionMethod::Average, Some(masks)) => masked_average(volumes, masks),
        (FusionMethod::Average, None) => average(volumes),
        (FusionMethod::Median, _) => median(volumes),
        (FusionMethod::Fba(params), _) => fba(volumes, params),
    }
}

/// Per-voxel arithmetic mean
pub fn average(volumes: &[Volume]) -> Result<Volume> {
    check_inputs(volumes, None)?;
    let n = volumes.len() as f64;
    let mut sum = vec![0.0; volumes[0].data.len()];
    for vol in volumes {
        for (s, &v) in sum.iter_mut().zip(vol.data.iter()) {
            *s += v;
        }
    }
    volumes[0].with_data(sum.into_iter().map(|s| s / n).collect())
}

/// Per-voxel mean weighted by masks: sum(value * mask) / sum(mask)
///
/// Voxels outside a mask contribute nothing, even when non-finite. A voxel
/// covered by no mask is 0.
pub fn masked_average(volumes: &[Volume], masks: &[Mask]) -> Result<Volume> {
    check_inputs(volumes, Some(masks))?;
    let len = volumes[0].data.len();
    let mut sum = vec![0.0; len];
    let mut count = vec![0u32; len];

    for (vol, mask) in volumes.iter().zip(masks.iter()) {
        for idx in 0..len {
            if mask.data[idx] > 0 {
                sum[idx] += vol.data[idx];
                count[idx] += 1;
            }
        }
    }

    let data = sum
        .into_iter()
        .zip(count)
        .map(|(s, c)| if c == 0 { 0.0 } else { s / c as f64 })
        .collect();
    volumes[0].with_data(data)
}

/// Per-voxel median; even counts average the two middle values
pub fn median(volumes: &[Volume]) -> Result<Volume> {
    check_inputs(volumes, None)?;
    let n = volumes.len();
    let mut column = vec![0.0; n];
    let data = (0..volumes[0].data.len())
        .map(|idx| {
            for (slot, vol) in column.iter_mut().zip(volumes.iter()) {
                *slot = vol.data[idx];
            }
            column.sort_by(f64::total_cmp);
            if n % 2 == 1 {
                column[n / 2]
            } else {
                0.5 * (column[n / 2 - 1] + column[n / 2])
            }
        })
        .collect();
    volumes[0].with_data(data)
}

/// Per-source, per-frequency fusion weights
///
/// Each magnitude spectrum is smoothed with a circular Gaussian and raised
/// to `p`. Smoothing covers the full spectrum with periodic boundaries rather
/// than a reflect-padded `rfftn` half-spectrum, so the fused spectrum stays
/// Hermitian and its inverse real. The power is taken relative to the largest source at each bin,
/// which keeps large exponents from overflowing or underflowing. Weights
/// sum to 1 at every bin where some source is non-zero, and are all 0 elsewhere.
pub fn fba_weights(spectra: &[Vec<Complex64>], dims: (usize, usize, usize), params: &FbaParams) -> Vec<Vec<f64>> {
    let smoothed: Vec<Vec<f64>> = spectra
        .iter()
        .map(|spectrum| {
            let magnitude: Vec<f64> = spectrum.iter().map(|c| c.norm()).collect();
            gaussian_smooth_3d(&magnitude, dims, params.sigma, FBA_TRUNCATE, Boundary::Wrap)
        })
        .collect();

    let n_bins = spectra.first().map_or(0, |s| s.len());
    let mut weights = vec![vec![0.0; n_bins]; spectra.len()];

    for bin in 0..n_bins {
        let peak = smoothed.iter().map(|s| s[bin]).fold(0.0f64, f64::max);
        if !(peak > 0.0) || !peak.is_finite() {
            continue;
        }
        let ln_peak = peak.ln();
        let mut total = 0.0;
        for (w, s) in weights.iter_mut().zip(smoothed.iter()) {
            let value = s[bin];
            w[bin] = if value > 0.0 { (params.p * (value.ln() - ln_peak)).exp() } else { 0.0 };
            total += w[bin];
        }
        for w in weights.iter_mut() {
            w[bin] /= total;
        }
    }

    weights
}

/// Frequency-domain fusion
pub fn fba(volumes: &[Volume], params: &FbaParams) -> Result<Volume> {
    check_inputs(volumes, None)?;
    let dims = volumes[0].dims();
    let mut workspace = Fft3dWorkspace::new(dims.0, dims.1, dims.2);

    let spectra: Vec<Vec<Complex64>> = volumes.iter().map(|v| workspace.fft3d_real(&v.data)).collect();
    let weights = fba_weights(&spectra, dims, params);

    let mut fused = vec![Complex64::new(0.0, 0.0); volumes[0].data.len()];
    for (spectrum, weight) in spectra.iter().zip(weights.iter()) {
        for ((u, &f), &w) in fused.iter_mut().zip(spectrum.iter()).zip(weight.iter()) {
            *u += f * w;
        }
    }

    volumes[0].with_data(workspace.ifft3d_real(fused))
}

/// Replace non-finite voxels with 0, returning how many were replaced
pub fn replace_non_finite(volume: Volume) -> (Volume, usize) {
    let mut volume = volume;
    let mut replaced = 0;
    for v in volume.data.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
            replaced += 1;
        }
    }
    (volume, replaced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Grid;

    fn grid(dims: (usize, usize, usize)) -> Grid {
        Grid::with_spacing(dims, (1.0, 1.0, 1.0))
    }

    fn pattern(dims: (usize, usize, usize), seed: f64) -> Volume {
        let g = grid(dims);
        let data = (0..g.len()).map(|i| ((i as f64 + seed) * 0.731).sin() * 10.0 + 20.0).collect();
        Volume::new(g, data).unwrap()
    }

    fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            assert!((x - y).abs() < tol, "index {}: {} vs {}", i, x, y);
        }
    }

    #[test]
    fn test_average_constant_volumes() {
        let g = grid((4, 4, 4));
        let vols: Vec<Volume> = [1.0, 2.0, 3.0].iter().map(|&c| Volume::filled(g.clone(), c)).collect();
        let out = fuse(&vols, None, &FusionMethod::Average).unwrap();
        assert!(out.data.iter().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_masked_average_of_identical_volumes() {
        let vol = pattern((5, 4, 3), 0.0);
        let vols = vec![vol.clone(), vol.clone(), vol.clone()];
        let masks: Vec<Mask> = vols.iter().map(|v| v.validity_mask()).collect();
        let out = fuse(&vols, Some(&masks), &FusionMethod::Average).unwrap();
        assert_eq!(out.data, vol.data);
    }

    #[test]
    fn test_masked_average_weights_and_empty_voxels() {
        let g = grid((3, 1, 1));
        let a = Volume::new(g.clone(), vec![2.0, f64::NAN, 5.0]).unwrap();
        let b = Volume::new(g.clone(), vec![4.0, 7.0, 1.0]).unwrap();
        let ma = Mask::new(g.clone(), vec![1, 0, 0]).unwrap();
        let mb = Mask::new(g.clone(), vec![1, 1, 0]).unwrap();
        let out = masked_average(&[a, b], &[ma, mb]).unwrap();
        assert_eq!(out.data, vec![3.0, 7.0, 0.0]);
    }

    #[test]
    fn test_median_odd_and_even() {
        let g = grid((2, 1, 1));
        let vols: Vec<Volume> = [[1.0, 9.0], [5.0, 3.0], [2.0, 4.0]]
            .iter()
            .map(|d| Volume::new(g.clone(), d.to_vec()).unwrap())
            .collect();
        assert_eq!(median(&vols).unwrap().data, vec![2.0, 4.0]);
        assert_eq!(median(&vols[..2]).unwrap().data, vec![3.0, 6.0]);
    }

    #[test]
    fn test_single_input_is_identity_for_every_method() {
        let vol = pattern((6, 5, 4), 1.0);
        let vols = vec![vol.clone()];
        for method in [FusionMethod::Average, FusionMethod::Median, FusionMethod::Fba(FbaParams::default())] {
            let out = fuse(&vols, None, &method).unwrap();
            assert_eq!(out.dims(), vol.dims());
            assert_close(&out.data, &vol.data, 1e-9);
        }
    }

    #[test]
    fn test_fba_weights_sum_to_one() {
        let dims = (6, 5, 4);
        let vols: Vec<Volume> = (0..3).map(|s| pattern(dims, s as f64 * 3.3)).collect();
        let mut ws = Fft3dWorkspace::new(dims.0, dims.1, dims.2);
        let spectra: Vec<Vec<Complex64>> = vols.iter().map(|v| ws.fft3d_real(&v.data)).collect();
        let weights = fba_weights(&spectra, dims, &FbaParams { p: 11.0, sigma: 1.5 });

        assert_eq!(weights.len(), 3);
        for bin in 0..spectra[0].len() {
            let total: f64 = weights.iter().map(|w| w[bin]).sum();
            assert!((total - 1.0).abs() < 1e-12, "bin {} sums to {}", bin, total);
            assert!(weights.iter().all(|w| w[bin] >= 0.0));
        }
    }

    #[test]
    fn test_fba_zero_inputs_give_zero() {
        let g = grid((4, 4, 2));
        let vols = vec![Volume::filled(g.clone(), 0.0), Volume::filled(g, 0.0)];
        let out = fba(&vols, &FbaParams::default()).unwrap();
        assert!(out.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_fba_identical_inputs_reproduce_input() {
        let vol = pattern((8, 6, 4), 2.0);
        let out = fba(&[vol.clone(), vol.clone()], &FbaParams::default()).unwrap();
        assert_close(&out.data, &vol.data, 1e-9);
    }

    #[test]
    fn test_fba_large_exponent_stays_finite() {
        let dims = (4, 4, 4);
        let a = pattern(dims, 0.0);
        let b = a.with_data(a.data.iter().map(|v| v * 1e6).collect()).unwrap();
        let out = fba(&[a, b], &FbaParams { p: 40.0, sigma: 1.0 }).unwrap();
        assert!(out.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_default_method_is_average() {
        assert_eq!(FusionMethod::default(), FusionMethod::Average);
        assert_eq!(FusionMethod::default().name(), "average");
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let a = Volume::filled(grid((2, 2, 2)), 1.0);
        let b = Volume::filled(grid((2, 2, 3)), 1.0);
        assert!(matches!(fuse(&[a, b], None, &FusionMethod::Median), Err(Error::Configuration(_))));
        assert!(matches!(fuse(&[], None, &FusionMethod::Average), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_replace_non_finite() {
        let vol = Volume::new(grid((4, 1, 1)), vec![1.0, f64::NAN, f64::NEG_INFINITY, 2.0]).unwrap();
        let (clean, replaced) = replace_non_finite(vol);
        assert_eq!(replaced, 2);
        assert_eq!(clean.data, vec![1.0, 0.0, 0.0, 2.0]);
    }
}
