//! Resampling volumes onto a template grid
//!
//! The [`Resampler`] capability applies a rigid transform and writes the
//! result on a target grid. [`GridResampler`] does this in-process;
//! `external::MrTransform` delegates to mrtrix3.

use std::f64::consts::PI;
use std::fmt;

use nalgebra::Vector4;

use crate::error::Result;
use crate::transform::RigidTransform;
use crate::volume::{Grid, Mask, Volume};

/// Interpolation kernel used when resampling intensities
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Interpolation {
    Nearest,
    Linear,
    Cubic,
    Sinc,
}

impl Interpolation {
    /// Name understood by `mrtransform -interp`
    pub fn as_str(&self) -> &'static str {
        match self {
            Interpolation::Nearest => "nearest",
            Interpolation::Linear => "linear",
            Interpolation::Cubic => "cubic",
            Interpolation::Sinc => "sinc",
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies a transform to a volume and samples it on a template grid
pub trait Resampler {
    /// `transform` maps `volume`'s world space into the template's world space
    fn resample(
        &self,
        volume: &Volume,
        transform: &RigidTransform,
        template: &Grid,
        interpolation: Interpolation,
    ) -> Result<Volume>;
}

impl<R: Resampler + ?Sized> Resampler for &R {
    fn resample(&self, volume: &Volume, transform: &RigidTransform, template: &Grid, interpolation: Interpolation) -> Result<Volume> {
        (**self).resample(volume, transform, template, interpolation)
    }
}

/// Resample a mask; always nearest-neighbour so the result stays binary
pub fn resample_mask<R: Resampler + ?Sized>(
    resampler: &R,
    mask: &Mask,
    transform: &RigidTransform,
    template: &Grid,
) -> Result<Mask> {
    let resampled = resampler.resample(&mask.to_volume(), transform, template, Interpolation::Nearest)?;
    Ok(Mask::from_volume(&resampled, 0.5))
}

/// In-process resampler; voxels that map outside the source are 0
#[derive(Clone, Copy, Debug, Default)]
pub struct GridResampler;

// Slack for sample positions that land on the border through rounding
const EDGE_TOL: f64 = 1e-6;
const LANCZOS_A: isize = 3;

impl Resampler for GridResampler {
    fn resample(
        &self,
        volume: &Volume,
        transform: &RigidTransform,
        template: &Grid,
        interpolation: Interpolation,
    ) -> Result<Volume> {
        // template voxel -> template world -> source world -> source voxel
        let to_source = volume.grid.world_to_voxel()? * transform.inverse().matrix() * template.voxel_to_world();
        let (nx, ny, nz) = template.dims;
        let mut data = vec![0.0; template.len()];

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let p = to_source * Vector4::new(i as f64, j as f64, k as f64, 1.0);
                    data[template.index(i, j, k)] = sample(volume, [p[0], p[1], p[2]], interpolation);
                }
            }
        }

        Volume::new(template.clone(), data)
    }
}

fn inside(p: [f64; 3], dims: (usize, usize, usize), half_voxel: bool) -> bool {
    let n = [dims.0, dims.1, dims.2];
    let pad = if half_voxel { 0.5 } else { 0.0 };
    (0..3).all(|a| p[a] >= -pad - EDGE_TOL && p[a] <= (n[a] - 1) as f64 + pad + EDGE_TOL)
}

fn sample(volume: &Volume, p: [f64; 3], interpolation: Interpolation) -> f64 {
    let dims = volume.dims();
    match interpolation {
        Interpolation::Nearest => {
            if !inside(p, dims, true) {
                return 0.0;
            }
            let n = [dims.0, dims.1, dims.2];
            let idx: Vec<usize> = (0..3).map(|a| (p[a].round().max(0.0) as usize).min(n[a] - 1)).collect();
            volume.get(idx[0], idx[1], idx[2])
        }
        Interpolation::Linear => {
            if !inside(p, dims, false) {
                return 0.0;
            }
            separable_sample(volume, p, 0, 1, |t| (1.0 - t.abs()).max(0.0))
        }
        Interpolation::Cubic => {
            if !inside(p, dims, false) {
                return 0.0;
            }
            separable_sample(volume, p, 1, 2, catmull_rom)
        }
        Interpolation::Sinc => {
            if !inside(p, dims, false) {
                return 0.0;
            }
            separable_sample(volume, p, LANCZOS_A - 1, LANCZOS_A, lanczos)
        }
    }
}

/// Weighted sum over taps floor(p)-before ..= floor(p)+after on each axis.
/// Out-of-range taps replicate the edge voxel; weights are renormalised.
fn separable_sample(volume: &Volume, p: [f64; 3], before: isize, after: isize, kernel: impl Fn(f64) -> f64) -> f64 {
    let (nx, ny, nz) = volume.dims();
    let n = [nx as isize, ny as isize, nz as isize];
    let mut taps: [Vec<(usize, f64)>; 3] = Default::default();

    for a in 0..3 {
        let base = p[a].floor() as isize;
        let mut sum = 0.0;
        for off in -before..=after {
            let pos = base + off;
            let w = kernel(p[a] - pos as f64);
            if w == 0.0 {
                continue;
            }
            taps[a].push((pos.clamp(0, n[a] - 1) as usize, w));
            sum += w;
        }
        if sum != 0.0 {
            for t in taps[a].iter_mut() {
                t.1 /= sum;
            }
        }
    }

    let mut value = 0.0;
    for &(k, wz) in &taps[2] {
        for &(j, wy) in &taps[1] {
            for &(i, wx) in &taps[0] {
                value += wx * wy * wz * volume.get(i, j, k);
            }
        }
    }
    value
}

/// Keys cubic convolution kernel with a = -0.5
fn catmull_rom(x: f64) -> f64 {
    let x = x.abs();
    if x <= 1.0 {
        1.5 * x * x * x - 2.5 * x * x + 1.0
    } else if x < 2.0 {
        -0.5 * x * x * x + 2.5 * x * x - 4.0 * x + 2.0
    } else {
        0.0
    }
}

fn lanczos(x: f64) -> f64 {
    let a = LANCZOS_A as f64;
    if x.abs() < 1e-12 {
        1.0
    } else if x.abs() >= a {
        0.0
    } else {
        let px = PI * x;
        a * px.sin() * (px / a).sin() / (px * px)
    }
}
