//! Core geometry primitives for `touchcal`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Pt2`, `Mat3`, ...),
//! - the homogeneous affine [`Transform`] with apply/invert/compose,
//! - calibration observations ([`SamplePair`]) and target placement.
//!
//! Transforms follow the column-vector convention of the X Input
//! "Coordinate Transformation Matrix" property: `p' = M · [x, y, 1]ᵀ`.

/// Linear algebra type aliases and helpers.
pub mod math;
/// Calibration observations and target layout.
pub mod sample;
/// Homogeneous affine transforms.
pub mod transform;

pub use math::*;
pub use sample::*;
pub use transform::{Transform, TransformError, SINGULAR_DET_EPS};
