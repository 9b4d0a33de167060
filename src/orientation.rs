//! Voxel-axis orientation analysis and reorientation
//!
//! An [`Orientation`] gives, for each voxel axis, the world axis it is
//! closest to (0 = x/L-R, 1 = y/P-A, 2 = z/I-S) and whether it runs against
//! that axis' positive (R, A, S) direction. Reorienting permutes and flips
//! the voxel array and updates the affine so every voxel keeps its world
//! position.

use std::fmt;
use std::path::Path;

use nalgebra::{Matrix3, Matrix4};

use crate::error::{Error, Result};
use crate::volume::{Grid, Volume};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisOrientation {
    /// World (or target) axis this voxel axis maps to
    pub axis: usize,
    /// True when the voxel axis runs in the negative direction
    pub flipped: bool,
}

impl AxisOrientation {
    pub const fn new(axis: usize, flipped: bool) -> Self {
        Self { axis, flipped }
    }

    fn sign(&self) -> f64 {
        if self.flipped {
            -1.0
        } else {
            1.0
        }
    }
}

pub type Orientation = [AxisOrientation; 3];

pub const IDENTITY: Orientation = [
    AxisOrientation::new(0, false),
    AxisOrientation::new(1, false),
    AxisOrientation::new(2, false),
];

/// Orientation of the voxel axes of a voxel-to-world affine
///
/// The zooms are divided out and the closest orthogonal matrix taken via
/// SVD; each voxel axis then claims the world axis it is most aligned with,
/// in order, and that world axis is removed from consideration.
pub fn io_orientation(affine: &Matrix4<f64>) -> Result<Orientation> {
    let mut rs: Matrix3<f64> = affine.fixed_view::<3, 3>(0, 0).into_owned();
    for c in 0..3 {
        let zoom = rs.column(c).norm();
        if zoom != 0.0 {
            rs.column_mut(c).unscale_mut(zoom);
        }
    }

    let svd = rs.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(Error::Configuration("SVD of affine failed".to_string())),
    };
    let s = svd.singular_values;
    let tol = s.max() * 3.0 * f64::EPSILON;
    let mut r = Matrix3::zeros();
    for k in 0..3 {
        if s[k] > tol {
            r += u.column(k) * v_t.row(k);
        }
    }

    let mut ornt = IDENTITY;
    for (in_ax, o) in ornt.iter_mut().enumerate() {
        let col = r.column(in_ax).into_owned();
        if col.iter().all(|v| v.abs() <= 1e-8) {
            return Err(Error::Configuration(format!(
                "affine does not determine the orientation of voxel axis {}",
                in_ax
            )));
        }
        let out_ax = col.iamax();
        *o = AxisOrientation::new(out_ax, col[out_ax] < 0.0);
        r.row_mut(out_ax).fill(0.0);
    }
    Ok(ornt)
}

const LABELS: [(char, char); 3] = [('L', 'R'), ('P', 'A'), ('I', 'S')];

/// Axis codes such as `['R', 'A', 'S']`; each letter names where the axis points
pub fn axcodes(ornt: &Orientation) -> [char; 3] {
    ornt.map(|o| {
        let (neg, pos) = LABELS[o.axis];
        if o.flipped {
            neg
        } else {
            pos
        }
    })
}

/// Acquisition plane implied by the voxel-axis order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceOrientation {
    Transverse,
    Sagittal,
    Coronal,
}

impl fmt::Display for SliceOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SliceOrientation::Transverse => "TRA",
            SliceOrientation::Sagittal => "SAG",
            SliceOrientation::Coronal => "COR",
        })
    }
}

/// `None` for axis orders other than (x,y,z), (y,z,x) and (x,z,y)
pub fn slice_orientation(ornt: &Orientation) -> Option<SliceOrientation> {
    match ornt.map(|o| o.axis) {
        [0, 1, 2] => Some(SliceOrientation::Transverse),
        [1, 2, 0] => Some(SliceOrientation::Sagittal),
        [0, 2, 1] => Some(SliceOrientation::Coronal),
        _ => None,
    }
}

/// Orientation that takes an array in `start` orientation to `end` orientation
pub fn ornt_transform(start: &Orientation, end: &Orientation) -> Result<Orientation> {
    let mut result = IDENTITY;
    for (start_in, s) in start.iter().enumerate() {
        let (end_in, e) = end
            .iter()
            .enumerate()
            .find(|(_, e)| e.axis == s.axis)
            .ok_or_else(|| Error::Configuration(format!("world axis {} missing from target orientation", s.axis)))?;
        result[start_in] = AxisOrientation::new(end_in, s.flipped != e.flipped);
    }
    Ok(result)
}

/// Affine taking voxel indices of the reoriented array back to the original
/// indices; `shape` is the shape before reorientation
pub fn inv_ornt_aff(ornt: &Orientation, shape: (usize, usize, usize)) -> Matrix4<f64> {
    let shape = [shape.0, shape.1, shape.2];
    let mut undo_reorder = Matrix4::zeros();
    let mut undo_flip = Matrix4::identity();
    for (r, o) in ornt.iter().enumerate() {
        undo_reorder[(r, o.axis)] = 1.0;
        let centre = -(shape[r] as f64 - 1.0) / 2.0;
        undo_flip[(r, r)] = o.sign();
        undo_flip[(r, 3)] = o.sign() * centre - centre;
    }
    undo_reorder[(3, 3)] = 1.0;
    undo_flip * undo_reorder
}

/// Flip then permute the voxel array; returns the data and its new shape
pub fn apply_orientation(data: &[f64], dims: (usize, usize, usize), ornt: &Orientation) -> (Vec<f64>, (usize, usize, usize)) {
    let src = [dims.0, dims.1, dims.2];
    let mut out_dims = [0usize; 3];
    for (ax, o) in ornt.iter().enumerate() {
        out_dims[o.axis] = src[ax];
    }

    let mut out = vec![0.0; data.len()];
    for k in 0..src[2] {
        for j in 0..src[1] {
            for i in 0..src[0] {
                let idx = [i, j, k];
                let mut o_idx = [0usize; 3];
                for (ax, o) in ornt.iter().enumerate() {
                    o_idx[o.axis] = if o.flipped { src[ax] - 1 - idx[ax] } else { idx[ax] };
                }
                let dst = o_idx[0] + o_idx[1] * out_dims[0] + o_idx[2] * out_dims[0] * out_dims[1];
                out[dst] = data[i + j * src[0] + k * src[0] * src[1]];
            }
        }
    }
    (out, (out_dims[0], out_dims[1], out_dims[2]))
}

/// Reorient a volume, keeping every voxel at the same world position
pub fn as_reoriented(volume: &Volume, ornt: &Orientation) -> Result<Volume> {
    let (data, dims) = apply_orientation(&volume.data, volume.dims(), ornt);
    let affine = volume.grid.voxel_to_world() * inv_ornt_aff(ornt, volume.dims());

    let src_vox = [volume.grid.voxel_size.0, volume.grid.voxel_size.1, volume.grid.voxel_size.2];
    let mut vox = [0.0; 3];
    for (ax, o) in ornt.iter().enumerate() {
        vox[o.axis] = src_vox[ax];
    }
    let mut grid = Grid::new(dims, (vox[0], vox[1], vox[2]), volume.grid.affine);
    grid.set_affine(&affine);
    Volume::new(grid, data)
}

/// Reorient to the closest RAS+ orientation
pub fn as_closest_canonical(volume: &Volume) -> Result<Volume> {
    let ornt = io_orientation(&volume.grid.voxel_to_world())?;
    if ornt == IDENTITY {
        return Ok(volume.clone());
    }
    as_reoriented(volume, &ornt)
}

/// Reorient `volume` to the voxel-axis order of `reference`
pub fn reorient_like(volume: &Volume, reference: &Grid) -> Result<Volume> {
    let ornt = ornt_transform(
        &io_orientation(&volume.grid.voxel_to_world())?,
        &io_orientation(&reference.voxel_to_world())?,
    )?;
    as_reoriented(volume, &ornt)
}

/// Split an affine into translation, rotation (with any flips) and scaling
fn decompose_affine(affine: &Matrix4<f64>, zooms: (f64, f64, f64)) -> Result<(Matrix4<f64>, Matrix4<f64>)> {
    if zooms.0 == 0.0 || zooms.1 == 0.0 || zooms.2 == 0.0 {
        return Err(Error::Configuration(format!("voxel size {:?} has a zero component", zooms)));
    }
    let mut translation = Matrix4::identity();
    let mut rotation = Matrix4::identity();
    let inv = [1.0 / zooms.0, 1.0 / zooms.1, 1.0 / zooms.2];
    for r in 0..3 {
        translation[(r, 3)] = affine[(r, 3)];
        for c in 0..3 {
            rotation[(r, c)] = affine[(r, c)] * inv[c];
        }
    }
    Ok((translation, rotation))
}

/// Reorient `volume` to the orientation of `reference`
///
/// Returns the reoriented volume and the input-to-reference voxel affine.
/// With `realign_grid`, the affine of the result keeps its own origin and
/// voxel sizes but takes the reference rotation.
pub fn reorient_to_reference(volume: &Volume, reference: &Volume, realign_grid: bool) -> Result<(Volume, Matrix4<f64>)> {
    let input_ornt = io_orientation(&volume.grid.voxel_to_world())?;
    let ref_ornt = io_orientation(&reference.grid.voxel_to_world())?;

    let ref_to_input = ornt_transform(&ref_ornt, &input_ornt)?;
    let input_to_ref_aff = inv_ornt_aff(&ref_to_input, reference.dims());
    let input_to_ref = io_orientation(&input_to_ref_aff)?;
    let mut out = as_reoriented(volume, &input_to_ref)?;

    if realign_grid {
        let (t_in, _) = decompose_affine(&out.grid.voxel_to_world(), out.grid.voxel_size)?;
        let (_, r_ref) = decompose_affine(&reference.grid.voxel_to_world(), reference.grid.voxel_size)?;
        let (sx, sy, sz) = out.grid.voxel_size;
        let scaling = Matrix4::from_diagonal(&nalgebra::Vector4::new(sx, sy, sz, 1.0));
        out.grid.set_affine(&(t_in * r_ref * scaling));
    }
    Ok((out, input_to_ref_aff))
}

/// One number in `numpy.savetxt` default layout (`%.18e`)
fn savetxt_number(v: f64) -> String {
    let s = format!("{:.18e}", v);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
        }
        None => s,
    }
}

pub fn format_matrix(m: &Matrix4<f64>) -> String {
    let mut text = String::new();
    for r in 0..4 {
        let row: Vec<String> = (0..4).map(|c| savetxt_number(m[(r, c)])).collect();
        text.push_str(&row.join(" "));
        text.push('\n');
    }
    text
}

pub fn write_matrix(path: &Path, m: &Matrix4<f64>) -> Result<()> {
    std::fs::write(path, format_matrix(m)).map_err(|e| Error::io(path, e))
}
