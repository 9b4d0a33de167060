//! 3D FFT using rustfft
//!
//! Transforms follow NumPy's `fftn`/`ifftn` conventions (the inverse carries
//! the 1/N factor). Data is in Fortran order, matching the NIfTI layout.

use num_complex::Complex64;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::Arc;

/// Index into a 3D array stored in Fortran order (column-major)
/// index = x + y*nx + z*nx*ny
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

struct AxisPlans {
    len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
    line: Vec<Complex64>,
}

impl AxisPlans {
    fn new(planner: &mut FftPlanner<f64>, len: usize) -> Self {
        let forward = planner.plan_fft(len, FftDirection::Forward);
        let inverse = planner.plan_fft(len, FftDirection::Inverse);
        let scratch_len = forward.get_inplace_scratch_len().max(inverse.get_inplace_scratch_len());
        Self {
            len,
            forward,
            inverse,
            scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
            line: vec![Complex64::new(0.0, 0.0); len],
        }
    }

    /// Transform every line of `data` along the axis with the given stride
    fn run(&mut self, data: &mut [Complex64], stride: usize, starts: impl Iterator<Item = usize>, direction: FftDirection) {
        let plan = match direction {
            FftDirection::Forward => Arc::clone(&self.forward),
            FftDirection::Inverse => Arc::clone(&self.inverse),
        };
        for start in starts {
            if stride == 1 {
                plan.process_with_scratch(&mut data[start..start + self.len], &mut self.scratch);
                continue;
            }
            for (n, slot) in self.line.iter_mut().enumerate() {
                *slot = data[start + n * stride];
            }
            plan.process_with_scratch(&mut self.line, &mut self.scratch);
            for (n, value) in self.line.iter().enumerate() {
                data[start + n * stride] = *value;
            }
        }
    }
}

/// FFT workspace that caches plans and scratch buffers for one grid size
///
/// Reuse one workspace when transforming several volumes of the same shape.
pub struct Fft3dWorkspace {
    nx: usize,
    ny: usize,
    nz: usize,
    x: AxisPlans,
    y: AxisPlans,
    z: AxisPlans,
}

impl Fft3dWorkspace {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            nx,
            ny,
            nz,
            x: AxisPlans::new(&mut planner, nx),
            y: AxisPlans::new(&mut planner, ny),
            z: AxisPlans::new(&mut planner, nz),
        }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    fn transform(&mut self, data: &mut [Complex64], direction: FftDirection) {
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        debug_assert_eq!(data.len(), nx * ny * nz);

        let x_starts = (0..nz).flat_map(move |k| (0..ny).map(move |j| idx3d(0, j, k, nx, ny)));
        self.x.run(data, 1, x_starts, direction);

        let y_starts = (0..nz).flat_map(move |k| (0..nx).map(move |i| idx3d(i, 0, k, nx, ny)));
        self.y.run(data, nx, y_starts, direction);

        let z_starts = (0..ny).flat_map(move |j| (0..nx).map(move |i| idx3d(i, j, 0, nx, ny)));
        self.z.run(data, nx * ny, z_starts, direction);
    }

    /// In-place forward 3D FFT
    pub fn fft3d(&mut self, data: &mut [Complex64]) {
        self.transform(data, FftDirection::Forward);
    }

    /// In-place inverse 3D FFT (with 1/N normalization)
    pub fn ifft3d(&mut self, data: &mut [Complex64]) {
        self.transform(data, FftDirection::Inverse);
        let n_total = (self.nx * self.ny * self.nz) as f64;
        for val in data.iter_mut() {
            *val /= n_total;
        }
    }

    /// Forward transform of real data
    pub fn fft3d_real(&mut self, data: &[f64]) -> Vec<Complex64> {
        let mut complex_data: Vec<Complex64> = data.iter().map(|&x| Complex64::new(x, 0.0)).collect();
        self.fft3d(&mut complex_data);
        complex_data
    }

    /// Inverse transform, keeping the real part
    pub fn ifft3d_real(&mut self, data: Vec<Complex64>) -> Vec<f64> {
        let mut complex_data = data;
        self.ifft3d(&mut complex_data);
        complex_data.iter().map(|c| c.re).collect()
    }
}

/// 3D FFT (in-place, complex-to-complex), matches numpy.fft.fftn
pub fn fft3d(data: &mut [Complex64], nx: usize, ny: usize, nz: usize) {
    Fft3dWorkspace::new(nx, ny, nz).fft3d(data);
}

/// 3D IFFT (in-place), matches numpy.fft.ifftn including 1/N normalization
pub fn ifft3d(data: &mut [Complex64], nx: usize, ny: usize, nz: usize) {
    Fft3dWorkspace::new(nx, ny, nz).ifft3d(data);
}
