//! Rigid-body transforms between scanner spaces
//!
//! A [`RigidTransform`] maps world (scanner) coordinates of a moving image to
//! world coordinates of its reference. mrtrix3 files (`mrregister -rigid`,
//! `mrtransform -linear`) hold the reverse mapping, reference to moving, so
//! the mrtrix3 backends invert at the file boundary. The text format itself is
//! shared.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3, Vector4};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct RigidTransform {
    matrix: Matrix4<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self { matrix: Matrix4::identity() }
    }

    /// Build from a homogeneous 4x4 matrix; the bottom row must be (0, 0, 0, 1)
    pub fn from_matrix(matrix: Matrix4<f64>) -> Result<Self> {
        let bottom = [matrix[(3, 0)], matrix[(3, 1)], matrix[(3, 2)], matrix[(3, 3)]];
        if bottom != [0.0, 0.0, 0.0, 1.0] {
            return Err(Error::TransformParse(format!(
                "last row must be 0 0 0 1, got {:?}",
                bottom
            )));
        }
        Ok(Self { matrix })
    }

    /// Rotation about x, then y, then z (radians), followed by a translation in mm
    pub fn from_euler_translation(roll: f64, pitch: f64, yaw: f64, translation: [f64; 3]) -> Self {
        let rotation = Rotation3::from_euler_angles(roll, pitch, yaw);
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation.matrix());
        matrix[(0, 3)] = translation[0];
        matrix[(1, 3)] = translation[1];
        matrix[(2, 3)] = translation[2];
        Self { matrix }
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.matrix[(0, 3)], self.matrix[(1, 3)], self.matrix[(2, 3)])
    }

    /// Rigid inverse: (R, t) -> (R^T, -R^T t)
    pub fn inverse(&self) -> Self {
        let rt = self.rotation().transpose();
        let t = -(rt * self.translation());
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(&rt);
        matrix[(0, 3)] = t[0];
        matrix[(1, 3)] = t[1];
        matrix[(2, 3)] = t[2];
        Self { matrix }
    }

    /// Apply `self` first, then `next`
    pub fn then(&self, next: &RigidTransform) -> Self {
        Self { matrix: next.matrix * self.matrix }
    }

    /// True when the linear part is orthonormal with determinant +1
    pub fn is_rigid(&self, tol: f64) -> bool {
        let r = self.rotation();
        let gram = r.transpose() * r;
        (gram - Matrix3::identity()).abs().max() < tol && (r.determinant() - 1.0).abs() < tol
    }

    pub fn apply_point(&self, p: [f64; 3]) -> [f64; 3] {
        let q = self.matrix * Vector4::new(p[0], p[1], p[2], 1.0);
        [q[0], q[1], q[2]]
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        text.parse()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_string()).map_err(|e| Error::io(path, e))
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl FromStr for RigidTransform {
    type Err = Error;

    /// Parse 3 or 4 rows of 4 numbers; `#` lines (mrtrix metadata) are skipped
    fn from_str(s: &str) -> Result<Self> {
        let rows: Vec<Vec<f64>> = s
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                line.split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|t| !t.is_empty())
                    .map(|t| t.parse::<f64>().map_err(|e| Error::TransformParse(format!("'{}': {}", t, e))))
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<_>>()?;

        if rows.len() != 3 && rows.len() != 4 {
            return Err(Error::TransformParse(format!("expected 3 or 4 rows, found {}", rows.len())));
        }
        let mut matrix = Matrix4::identity();
        for (r, row) in rows.iter().enumerate() {
            if row.len() != 4 {
                return Err(Error::TransformParse(format!(
                    "row {} has {} values, expected 4",
                    r + 1,
                    row.len()
                )));
            }
            for (c, &v) in row.iter().enumerate() {
                matrix[(r, c)] = v;
            }
        }
        RigidTransform::from_matrix(matrix)
    }
}

impl fmt::Display for RigidTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..4 {
            let row: Vec<String> = (0..4).map(|c| format!("{:.12}", self.matrix[(r, c)])).collect();
            writeln!(f, "{}", row.join(" "))?;
        }
        Ok(())
    }
}
