//! Homogeneous 2D affine transforms.
//!
//! A [`Transform`] wraps a 3×3 matrix `M` that acts on **column vectors**:
//! `p' = M · [x, y, 1]ᵀ`, followed by division by the third component. This
//! is the layout the X Input "Coordinate Transformation Matrix" property uses,
//! and the row-major flattening of `M` is exactly the 9-value property string.
//!
//! Three coordinate spaces meet here:
//!
//! - *raw*: what the device reports with no calibration active,
//! - *calibrated*: raw mapped through the currently active transform,
//! - *screen*: the normalized target position on the display.
//!
//! Converting a tap reported under an old calibration into the new one is a
//! chain `old⁻¹` then `new`, see [`Transform::then`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{from_homogeneous, to_homogeneous, Mat3, Pt2, Real};

/// Determinant magnitude below which a transform is treated as singular.
pub const SINGULAR_DET_EPS: Real = 1e-12;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum TransformError {
    #[error("transform is singular (det = {det:e})")]
    Singular { det: Real },
}

/// A 2D affine map in homogeneous coordinates (column-vector convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[Real; 9]", into = "[Real; 9]")]
pub struct Transform {
    matrix: Mat3,
}

impl Transform {
    /// The identity map.
    pub fn identity() -> Self {
        Self {
            matrix: Mat3::identity(),
        }
    }

    /// Wrap an existing matrix without modification.
    pub fn from_matrix(matrix: Mat3) -> Self {
        Self { matrix }
    }

    /// Build from 9 values in row-major order.
    pub fn from_row_major(values: [Real; 9]) -> Self {
        Self {
            matrix: Mat3::from_row_slice(&values),
        }
    }

    /// Flatten to 9 values in row-major order.
    pub fn to_row_major(&self) -> [Real; 9] {
        let m = &self.matrix;
        [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
        ]
    }

    pub fn matrix(&self) -> &Mat3 {
        &self.matrix
    }

    /// `true` if the bottom row is `[0, 0, 1]` within `tol`.
    pub fn is_affine(&self, tol: Real) -> bool {
        let m = &self.matrix;
        m[(2, 0)].abs() <= tol && m[(2, 1)].abs() <= tol && (m[(2, 2)] - 1.0).abs() <= tol
    }

    /// Compute `M · [x, y, 1]ᵀ` and return the dehomogenized point.
    pub fn apply(&self, p: &Pt2) -> Pt2 {
        from_homogeneous(&(self.matrix * to_homogeneous(p)))
    }

    /// Matrix inverse.
    ///
    /// Fails with [`TransformError::Singular`] when `|det| < SINGULAR_DET_EPS`.
    pub fn inverse(&self) -> Result<Self, TransformError> {
        let det = self.matrix.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_DET_EPS {
            return Err(TransformError::Singular { det });
        }
        self.matrix
            .try_inverse()
            .map(Self::from_matrix)
            .ok_or(TransformError::Singular { det })
    }

    /// Compose so that `self.then(next).apply(p) == next.apply(self.apply(p))`.
    pub fn then(&self, next: &Transform) -> Self {
        Self {
            matrix: next.matrix * self.matrix,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<[Real; 9]> for Transform {
    fn from(values: [Real; 9]) -> Self {
        Self::from_row_major(values)
    }
}

impl From<Transform> for [Real; 9] {
    fn from(t: Transform) -> Self {
        t.to_row_major()
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.to_row_major();
        for (row, chunk) in v.chunks(3).enumerate() {
            if row > 0 {
                writeln!(f)?;
            }
            write!(f, "[{:>10.6} {:>10.6} {:>10.6}]", chunk[0], chunk[1], chunk[2])?;
        }
        Ok(())
    }
}

/// Apply `transform` to `point`.
pub fn apply(transform: &Transform, point: &Pt2) -> Pt2 {
    transform.apply(point)
}

/// Invert `transform`, failing on a singular matrix.
pub fn invert(transform: &Transform) -> Result<Transform, TransformError> {
    transform.inverse()
}
