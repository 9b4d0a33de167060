//! Structural similarity and peak signal-to-noise ratio

use crate::error::{Error, Result};
use crate::utils::smoothing::{gaussian_smooth_3d, uniform_filter_3d, Boundary};
use crate::volume::{Mask, Volume};

const K1: f64 = 0.01;
const K2: f64 = 0.03;
/// Gaussian window extent, in standard deviations
const SSIM_TRUNCATE: f64 = 3.5;
/// Side of the cubic window when Gaussian weights are off
const UNIFORM_WINDOW: usize = 7;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SsimParams {
    pub sigma: f64,
    /// Gaussian-weighted window; otherwise a 7x7x7 box
    pub gaussian_weights: bool,
    /// Normalise variances by N-1 instead of N
    pub use_sample_covariance: bool,
}

impl Default for SsimParams {
    fn default() -> Self {
        Self { sigma: 1.5, gaussian_weights: true, use_sample_covariance: false }
    }
}

impl SsimParams {
    fn window_size(&self) -> usize {
        if self.gaussian_weights {
            2 * crop_pad(self.sigma) + 1
        } else {
            UNIFORM_WINDOW
        }
    }

    fn filter(&self, data: &[f64], dims: (usize, usize, usize)) -> Vec<f64> {
        if self.gaussian_weights {
            gaussian_smooth_3d(data, dims, self.sigma, SSIM_TRUNCATE, Boundary::Reflect)
        } else {
            uniform_filter_3d(data, dims, UNIFORM_WINDOW, Boundary::Reflect)
        }
    }
}

/// Border excluded from SSIM averages: int(3.5 * sigma + 0.5) voxels
pub fn crop_pad(sigma: f64) -> usize {
    (SSIM_TRUNCATE * sigma + 0.5) as usize
}

/// Local SSIM at every voxel of `image` against `reference`
pub fn ssim_map(image: &Volume, reference: &Volume, data_range: f64, params: &SsimParams) -> Result<Vec<f64>> {
    if !image.grid.same_shape(&reference.grid) {
        return Err(Error::Configuration(format!(
            "image shape {:?} does not match reference shape {:?}",
            image.dims(),
            reference.dims()
        )));
    }
    let dims = image.dims();
    let win = params.window_size();
    if dims.0 < win || dims.1 < win || dims.2 < win {
        return Err(Error::Configuration(format!(
            "SSIM window of {} voxels exceeds image shape {:?}",
            win, dims
        )));
    }

    let x = &image.data;
    let y = &reference.data;
    let xx: Vec<f64> = x.iter().map(|v| v * v).collect();
    let yy: Vec<f64> = y.iter().map(|v| v * v).collect();
    let xy: Vec<f64> = x.iter().zip(y).map(|(a, b)| a * b).collect();

    let ux = params.filter(x, dims);
    let uy = params.filter(y, dims);
    let uxx = params.filter(&xx, dims);
    let uyy = params.filter(&yy, dims);
    let uxy = params.filter(&xy, dims);

    let np = win.pow(3) as f64;
    let cov_norm = if params.use_sample_covariance { np / (np - 1.0) } else { 1.0 };
    let c1 = (K1 * data_range).powi(2);
    let c2 = (K2 * data_range).powi(2);

    Ok((0..x.len())
        .map(|n| {
            let vx = cov_norm * (uxx[n] - ux[n] * ux[n]);
            let vy = cov_norm * (uyy[n] - uy[n] * uy[n]);
            let vxy = cov_norm * (uxy[n] - ux[n] * uy[n]);
            let a = (2.0 * ux[n] * uy[n] + c1) * (2.0 * vxy + c2);
            let b = (ux[n] * ux[n] + uy[n] * uy[n] + c1) * (vx + vy + c2);
            a / b
        })
        .collect())
}

pub fn psnr(mse: f64, data_range: f64) -> f64 {
    10.0 * (data_range * data_range / mse).log10()
}

/// Whole-image and (optionally) masked PSNR/SSIM
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityScores {
    pub psnr: f64,
    pub ssim: f64,
    pub psnr_mask: Option<f64>,
    pub ssim_mask: Option<f64>,
}

impl QualityScores {
    pub fn columns(masked: bool) -> Vec<&'static str> {
        if masked {
            vec!["PSNR", "SSIM", "PSNR_mask", "SSIM_mask"]
        } else {
            vec!["PSNR", "SSIM"]
        }
    }

    pub fn values(&self) -> Vec<f64> {
        let mut v = vec![self.psnr, self.ssim];
        v.extend(self.psnr_mask);
        v.extend(self.ssim_mask);
        v
    }
}

/// Sum of `values` and of `weights` over the voxels at least `pad` from every border
fn cropped_sums(values: &[f64], weights: Option<&[u8]>, dims: (usize, usize, usize), pad: usize) -> (f64, f64) {
    let (nx, ny, nz) = dims;
    let mut sum = 0.0;
    let mut count = 0.0;
    for k in pad..nz.saturating_sub(pad) {
        for j in pad..ny.saturating_sub(pad) {
            for i in pad..nx.saturating_sub(pad) {
                let n = i + j * nx + k * nx * ny;
                let w = weights.map_or(1.0, |m| m[n] as f64);
                sum += values[n] * w;
                count += w;
            }
        }
    }
    (sum, count)
}

/// PSNR and SSIM of `image` against `reference`
///
/// The data range is the reference maximum (inside `mask` when given).
pub fn image_quality(reference: &Volume, image: &Volume, mask: Option<&Mask>, params: &SsimParams) -> Result<QualityScores> {
    if let Some(m) = mask {
        if !m.grid.same_shape(&reference.grid) {
            return Err(Error::Configuration(format!(
                "mask shape {:?} does not match reference shape {:?}",
                m.grid.dims,
                reference.dims()
            )));
        }
    }
    let data_range = match mask {
        Some(m) => reference
            .data
            .iter()
            .zip(&m.data)
            .map(|(&v, &inside)| v * inside as f64)
            .fold(f64::NEG_INFINITY, f64::max),
        None => reference.data.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };

    let map = ssim_map(image, reference, data_range, params)?;
    let sq_err: Vec<f64> = reference.data.iter().zip(&image.data).map(|(a, b)| (a - b).powi(2)).collect();
    let dims = reference.dims();
    let pad = crop_pad(params.sigma);

    let mse = sq_err.iter().sum::<f64>() / sq_err.len() as f64;
    let (ssim_sum, ssim_count) = cropped_sums(&map, None, dims, pad);

    let (psnr_mask, ssim_mask) = match mask {
        Some(m) => {
            let inside = m.count() as f64;
            let masked_err: f64 = sq_err.iter().zip(&m.data).map(|(e, &w)| e * w as f64).sum();
            let (s, c) = cropped_sums(&map, Some(&m.data), dims, pad);
            (Some(psnr(masked_err / inside, data_range)), Some(s / c))
        }
        None => (None, None),
    };

    Ok(QualityScores {
        psnr: psnr(mse, data_range),
        ssim: ssim_sum / ssim_count,
        psnr_mask,
        ssim_mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Grid;

    fn textured(n: usize) -> Volume {
        let grid = Grid::with_spacing((n, n, n), (1.0, 1.0, 1.0));
        let data = (0..n * n * n)
            .map(|idx| {
                let (i, j, k) = (idx % n, (idx / n) % n, idx / (n * n));
                10.0 + 5.0 * ((i as f64) * 0.7).sin() + 3.0 * ((j as f64) * 0.4).cos() + (k % 3) as f64
            })
            .collect();
        Volume::new(grid, data).unwrap()
    }

    #[test]
    fn test_crop_pad() {
        assert_eq!(crop_pad(1.5), 5);
        assert_eq!(crop_pad(1.0), 4);
    }

    #[test]
    fn test_identical_images() {
        let vol = textured(12);
        let scores = image_quality(&vol, &vol, None, &SsimParams::default()).unwrap();
        assert!((scores.ssim - 1.0).abs() < 1e-9);
        assert!(scores.psnr.is_infinite());
        assert!(scores.psnr_mask.is_none());
    }

    #[test]
    fn test_noise_lowers_ssim() {
        let reference = textured(12);
        let noisy_data = reference
            .data
            .iter()
            .enumerate()
            .map(|(n, v)| v + if n % 2 == 0 { 2.0 } else { -2.0 })
            .collect();
        let noisy = reference.with_data(noisy_data).unwrap();
        let scores = image_quality(&reference, &noisy, None, &SsimParams::default()).unwrap();
        assert!(scores.ssim < 0.99 && scores.ssim > 0.0);

        let range = reference.max();
        let expected = 10.0 * (range * range / 4.0).log10();
        assert!((scores.psnr - expected).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_window_and_sample_covariance() {
        let reference = textured(12);
        let shifted = reference.with_data(reference.data.iter().map(|v| v + 1.0).collect()).unwrap();
        let params = SsimParams { gaussian_weights: false, use_sample_covariance: true, ..Default::default() };
        let map = ssim_map(&shifted, &reference, reference.max(), &params).unwrap();
        assert!(map.iter().all(|&s| s > 0.9 && s <= 1.0 + 1e-12));
    }

    #[test]
    fn test_masked_scores() {
        let reference = textured(12);
        let mut data = reference.data.clone();
        // Corrupt a voxel outside the mask
        data[0] += 50.0;
        let image = reference.with_data(data).unwrap();
        let mask = Mask::new(reference.grid.clone(), (0..1728).map(|n| (n != 0) as u8).collect()).unwrap();

        let scores = image_quality(&reference, &image, Some(&mask), &SsimParams::default()).unwrap();
        assert!(scores.psnr.is_finite());
        assert!(scores.psnr_mask.unwrap().is_infinite());
        assert_eq!(scores.values().len(), 4);
    }

    #[test]
    fn test_window_larger_than_image() {
        let vol = textured(8);
        assert!(matches!(
            ssim_map(&vol, &vol, 1.0, &SsimParams::default()),
            Err(Error::Configuration(_))
        ));
    }
}
