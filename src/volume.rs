//! In-memory volumes and masks
//!
//! Data is stored flattened in Fortran order (x varies fastest) to match the
//! NIfTI convention: index = x + y*nx + z*nx*ny.

use nalgebra::{Matrix4, Vector4};

use crate::error::{Error, Result};
use crate::fft::idx3d;

/// Voxel grid geometry shared by a volume and its masks
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Voxel-to-world affine (4x4, row-major)
    pub affine: [f64; 16],
}

impl Grid {
    pub fn new(dims: (usize, usize, usize), voxel_size: (f64, f64, f64), affine: [f64; 16]) -> Self {
        Self { dims, voxel_size, affine }
    }

    /// Grid with a diagonal affine built from the voxel sizes
    pub fn with_spacing(dims: (usize, usize, usize), voxel_size: (f64, f64, f64)) -> Self {
        let (vx, vy, vz) = voxel_size;
        Self {
            dims,
            voxel_size,
            affine: [
                vx, 0.0, 0.0, 0.0,
                0.0, vy, 0.0, 0.0,
                0.0, 0.0, vz, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        idx3d(i, j, k, self.dims.0, self.dims.1)
    }

    pub fn same_shape(&self, other: &Grid) -> bool {
        self.dims == other.dims
    }

    pub fn voxel_to_world(&self) -> Matrix4<f64> {
        Matrix4::from_row_slice(&self.affine)
    }

    /// Inverse of the voxel-to-world affine; fails on a singular affine
    pub fn world_to_voxel(&self) -> Result<Matrix4<f64>> {
        self.voxel_to_world().try_inverse().ok_or_else(|| {
            Error::Configuration("voxel-to-world affine is not invertible".to_string())
        })
    }

    /// World coordinate of the centre of voxel (i, j, k)
    pub fn world_point(&self, i: f64, j: f64, k: f64) -> [f64; 3] {
        let p = self.voxel_to_world() * Vector4::new(i, j, k, 1.0);
        [p[0], p[1], p[2]]
    }

    pub fn set_affine(&mut self, m: &Matrix4<f64>) {
        for r in 0..4 {
            for c in 0..4 {
                self.affine[r * 4 + c] = m[(r, c)];
            }
        }
    }
}

/// Real-valued volume: intensities plus grid geometry
#[derive(Clone, Debug)]
pub struct Volume {
    pub grid: Grid,
    pub data: Vec<f64>,
}

impl Volume {
    pub fn new(grid: Grid, data: Vec<f64>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(Error::Configuration(format!(
                "volume data has {} voxels, grid {:?} needs {}",
                data.len(),
                grid.dims,
                grid.len()
            )));
        }
        Ok(Self { grid, data })
    }

    pub fn filled(grid: Grid, value: f64) -> Self {
        let n = grid.len();
        Self { grid, data: vec![value; n] }
    }

    /// New volume on the same grid with different intensities
    pub fn with_data(&self, data: Vec<f64>) -> Result<Self> {
        Volume::new(self.grid.clone(), data)
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize, usize) {
        self.grid.dims
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.grid.index(i, j, k)]
    }

    /// Field-of-view mask: 1 where the voxel holds a finite value
    pub fn validity_mask(&self) -> Mask {
        Mask {
            grid: self.grid.clone(),
            data: self.data.iter().map(|v| v.is_finite() as u8).collect(),
        }
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Binary mask on a grid; values are 0 or 1
#[derive(Clone, Debug)]
pub struct Mask {
    pub grid: Grid,
    pub data: Vec<u8>,
}

impl Mask {
    pub fn new(grid: Grid, data: Vec<u8>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(Error::Configuration(format!(
                "mask has {} voxels, grid {:?} needs {}",
                data.len(),
                grid.dims,
                grid.len()
            )));
        }
        Ok(Self { grid, data: data.into_iter().map(|v| (v > 0) as u8).collect() })
    }

    /// Binarise a volume: voxels strictly above `threshold` become 1
    pub fn from_volume(volume: &Volume, threshold: f64) -> Self {
        Self {
            grid: volume.grid.clone(),
            data: volume.data.iter().map(|&v| (v > threshold) as u8).collect(),
        }
    }

    pub fn to_volume(&self) -> Volume {
        Volume {
            grid: self.grid.clone(),
            data: self.data.iter().map(|&v| v as f64).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.data.iter().map(|&v| v as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_mask_flags_non_finite() {
        let grid = Grid::with_spacing((2, 2, 1), (1.0, 1.0, 1.0));
        let vol = Volume::new(grid, vec![1.0, f64::NAN, f64::INFINITY, -2.0]).unwrap();
        let mask = vol.validity_mask();
        assert_eq!(mask.data, vec![1, 0, 0, 1]);
        assert_eq!(mask.count(), 2);
    }

    #[test]
    fn test_volume_rejects_wrong_length() {
        let grid = Grid::with_spacing((2, 2, 2), (1.0, 1.0, 1.0));
        assert!(matches!(Volume::new(grid, vec![0.0; 7]), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_mask_binarises() {
        let grid = Grid::with_spacing((3, 1, 1), (1.0, 1.0, 1.0));
        let mask = Mask::new(grid.clone(), vec![0, 2, 255]).unwrap();
        assert_eq!(mask.data, vec![0, 1, 1]);

        let vol = Volume::new(grid, vec![0.2, 0.5, 0.9]).unwrap();
        assert_eq!(Mask::from_volume(&vol, 0.5).data, vec![0, 0, 1]);
    }

    #[test]
    fn test_world_roundtrip() {
        let grid = Grid::new(
            (4, 4, 4),
            (2.0, 2.0, 2.0),
            [
                2.0, 0.0, 0.0, -10.0,
                0.0, 2.0, 0.0, 5.0,
                0.0, 0.0, 2.0, 1.0,
                0.0, 0.0, 0.0, 1.0,
            ],
        );
        let p = grid.world_point(1.0, 2.0, 3.0);
        assert_eq!(p, [-8.0, 9.0, 7.0]);

        let inv = grid.world_to_voxel().unwrap();
        let v = inv * Vector4::new(p[0], p[1], p[2], 1.0);
        assert!((v[0] - 1.0).abs() < 1e-12);
        assert!((v[1] - 2.0).abs() < 1e-12);
        assert!((v[2] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_set_affine_roundtrip() {
        let mut grid = Grid::with_spacing((2, 2, 2), (1.0, 1.0, 1.0));
        let mut m = grid.voxel_to_world();
        m[(0, 3)] = 7.5;
        grid.set_affine(&m);
        assert_eq!(grid.affine[3], 7.5);
    }
}
