//! Calibration workflow for pointer input devices.
//!
//! This crate ties the fit engine to its collaborators:
//!
//! - [`device`]: device enumeration and the calibration property
//!   ([`XInputBackend`] for X11, [`MemoryBackend`] in process),
//! - [`sampler`]: tap sources for the interactive phases,
//! - [`session`]: the explicit calibration state machine,
//! - [`store`]: the persisted calibration record,
//! - [`workflow`]: the calibrate and activate entry points.
//!
//! # Example
//!
//! ```no_run
//! use touchcal_core::Pt2;
//! use touchcal_pipeline::{
//!     run_calibration, AutoConfirm, CalibrateOptions, MemoryBackend, ScriptedSampler,
//! };
//!
//! let mut backend = MemoryBackend::new().with_device(10, "ELAN Touchscreen", None);
//! let mut sampler = ScriptedSampler::from_taps([
//!     Pt2::new(0.12, 0.09),
//!     Pt2::new(0.91, 0.11),
//!     Pt2::new(0.10, 0.92),
//!     Pt2::new(0.88, 0.90),
//! ]);
//! let outcome = run_calibration(
//!     &mut backend,
//!     &mut sampler,
//!     &mut AutoConfirm(true),
//!     &CalibrateOptions::default(),
//! )?;
//! println!("{outcome:?}");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod device;
pub mod sampler;
pub mod session;
pub mod store;
pub mod workflow;
mod xinput;

pub use device::{
    format_matrix_property, parse_matrix_property, read_active_transform, select_default,
    select_device, write_transform, ActiveTransform, DeviceBackend, DeviceError, MemoryBackend,
    PointerDevice, TransformSource, MATRIX_PROPERTY,
};
pub use sampler::{LineSampler, PointSampler, SamplerEvent, ScriptedSampler, TapPhase, TapRequest};
pub use session::{
    CalibrationSession, Preview, SessionConfig, SessionError, SessionResult, SessionState,
};
pub use store::{default_record_path, CalibrationRecord, StoreError};
pub use workflow::{
    run_activate, run_calibration, AutoConfirm, CalibrateOptions, CalibrationOutcome, Confirmer,
    PromptConfirm,
};
pub use xinput::{find_property, parse_pointer_list, XInputBackend};
