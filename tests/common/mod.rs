//! Common test utilities for nii-superres integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use nii_superres::nifti_io::{save_mask_to_file, save_nifti_to_file};
use nii_superres::registration::{Registrar, RegistrationRequest};
use nii_superres::transform::RigidTransform;
use nii_superres::{Grid, Mask, Result, Volume};

/// Compute RMSE between two arrays, only within mask (non-zero values)
pub fn rmse(a: &[f64], b: &[f64], mask: &[u8]) -> f64 {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for i in 0..a.len() {
        if mask[i] > 0 {
            let diff = a[i] - b[i];
            sum_sq += diff * diff;
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    (sum_sq / count as f64).sqrt()
}

/// Compute NRMSE (normalized by range of ground truth within mask)
pub fn nrmse(a: &[f64], b: &[f64], mask: &[u8]) -> f64 {
    let rmse_val = rmse(a, b, mask);

    let mut min_b = f64::INFINITY;
    let mut max_b = f64::NEG_INFINITY;
    for i in 0..b.len() {
        if mask[i] > 0 {
            min_b = min_b.min(b[i]);
            max_b = max_b.max(b[i]);
        }
    }

    let range = max_b - min_b;
    if range == 0.0 {
        return 0.0;
    }
    rmse_val / range
}

/// Isotropic 1 mm grid of size n^3
pub fn cube_grid(n: usize) -> Grid {
    Grid::with_spacing((n, n, n), (1.0, 1.0, 1.0))
}

/// Smooth ellipsoidal "head" with an inner "ventricle", zero near the borders
pub fn phantom(n: usize) -> Volume {
    let c = (n as f64 - 1.0) / 2.0;
    let r = n as f64 * 0.3;
    let data = (0..n * n * n)
        .map(|idx| {
            let (i, j, k) = (idx % n, (idx / n) % n, idx / (n * n));
            let (x, y, z) = ((i as f64 - c) / r, (j as f64 - c) / (0.8 * r), (k as f64 - c) / (0.9 * r));
            let d2 = x * x + y * y + z * z;
            let head = 100.0 * (-2.0 * d2 * d2).exp();
            let inner = 40.0 * (-8.0 * ((x - 0.2).powi(2) + y * y + z * z)).exp();
            head - inner
        })
        .collect();
    Volume::new(cube_grid(n), data).unwrap()
}

/// Box phantom with sharp edges
pub fn box_phantom(n: usize) -> Volume {
    let (lo, hi) = (n / 4, 3 * n / 4);
    let data = (0..n * n * n)
        .map(|idx| {
            let (i, j, k) = (idx % n, (idx / n) % n, idx / (n * n));
            let inside = (lo..hi).contains(&i) && (lo..hi).contains(&j) && (lo..hi).contains(&k);
            let inner = (lo + 2..hi - 2).contains(&i) && (lo + 2..hi - 2).contains(&j);
            if inner {
                50.0
            } else if inside {
                100.0
            } else {
                0.0
            }
        })
        .collect();
    Volume::new(cube_grid(n), data).unwrap()
}

/// Circular Gaussian blur along one axis
pub fn blur_axis(volume: &Volume, axis: usize, sigma: f64) -> Volume {
    let (nx, ny, nz) = volume.dims();
    let len = [nx, ny, nz][axis] as isize;
    let radius = (4.0 * sigma).ceil() as isize;
    let weights: Vec<f64> = (-radius..=radius).map(|d| (-(d * d) as f64 / (2.0 * sigma * sigma)).exp()).collect();
    let total: f64 = weights.iter().sum();

    let mut out = vec![0.0; volume.data.len()];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let pos = [i, j, k];
                let mut sum = 0.0;
                for (w, d) in weights.iter().zip(-radius..=radius) {
                    let mut src = pos;
                    src[axis] = (pos[axis] as isize + d).rem_euclid(len) as usize;
                    sum += w * volume.get(src[0], src[1], src[2]);
                }
                out[i + j * nx + k * nx * ny] = sum / total;
            }
        }
    }
    volume.with_data(out).unwrap()
}

pub fn write_volume(dir: &Path, name: &str, volume: &Volume) -> PathBuf {
    let path = dir.join(name);
    save_nifti_to_file(&path, volume).unwrap();
    path
}

pub fn write_mask(dir: &Path, name: &str, mask: &Mask) -> PathBuf {
    let path = dir.join(name);
    save_mask_to_file(&path, mask).unwrap();
    path
}

/// Registrar that knows the true transform of every input and records its calls
pub struct OracleRegistrar {
    pub truth: Vec<RigidTransform>,
    pub calls: RefCell<Vec<usize>>,
}

impl OracleRegistrar {
    pub fn new(truth: Vec<RigidTransform>) -> Self {
        Self { truth, calls: RefCell::new(Vec::new()) }
    }
}

impl Registrar for OracleRegistrar {
    fn register(&self, request: &RegistrationRequest<'_>) -> Result<RigidTransform> {
        self.calls.borrow_mut().push(request.index);
        Ok(self.truth[request.index].clone())
    }
}

/// Result of comparing an output against ground truth
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub rmse: f64,
    pub nrmse: f64,
}

impl TestResult {
    pub fn new(name: &str, output: &[f64], ground_truth: &[f64], mask: &[u8]) -> Self {
        TestResult {
            name: name.to_string(),
            rmse: rmse(output, ground_truth, mask),
            nrmse: nrmse(output, ground_truth, mask),
        }
    }

    pub fn print(&self) {
        println!("{:<15} RMSE={:.6}  NRMSE={:.4}", self.name, self.rmse, self.nrmse);
    }
}
