//! Closed-form fits for touchscreen calibration.
//!
//! Everything here is a pure function of its inputs: no solver state is
//! retained between calls. See [`affine`] for the point-application
//! convention shared by both fitting modes.

pub mod affine;

pub use affine::*;
