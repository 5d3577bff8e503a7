//! Calibration session state machine.
//!
//! ```text
//! AwaitingDevice ─select_device─▶ AwaitingPointTap(0) ─tap─▶ … ─tap─▶ Fitting
//!        Fitting ─fit─▶ AwaitingTestTap(0) ─tap─▶ … ─tap─▶ AwaitingConfirm
//!        AwaitingConfirm ─confirm(true)─▶ Done
//!        AwaitingConfirm ─confirm(false)─▶ Cancelled
//! any non-terminal state ─cancel─▶ Cancelled
//! ```
//!
//! Taps arrive as the device reports them, i.e. under the transform that was
//! active when the session started. Calibration taps are mapped through the
//! inverse of that transform before being recorded, so the fit always sees
//! raw coordinates. Test taps are mapped through `old⁻¹` then the new fit to
//! preview the result without touching the device.
//!
//! A failed fit discards the collected samples and restarts point
//! collection. Cancelling discards everything.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use touchcal_core::{target_grid, Pt2, Real, SamplePair, Transform, TransformError};
use touchcal_linear::{fit_affine, AffineError, AffineFit, MIN_SAMPLES};

use crate::device::PointerDevice;
use crate::sampler::{SamplerEvent, TapPhase, TapRequest};

/// Options for a calibration session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of calibration targets.
    pub points: usize,
    /// Number of preview taps after fitting; 0 skips the test phase.
    pub test_points: usize,
    /// Fit each axis independently (no rotation or shear).
    pub disable_rotation: bool,
    /// Inset of the calibration grid from the screen edges.
    pub margin: Real,
    /// Inset of the test grid from the screen edges.
    pub test_margin: Real,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            points: 4,
            test_points: 0,
            disable_rotation: false,
            margin: 0.1,
            test_margin: 0.3,
        }
    }
}

/// Where the session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    AwaitingDevice,
    AwaitingPointTap(usize),
    Fitting,
    AwaitingTestTap(usize),
    AwaitingConfirm,
    Done,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Cancelled)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    #[error("cannot {action} while in state {state:?}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
    #[error("active calibration cannot be inverted: {0}")]
    SingularActiveTransform(#[from] TransformError),
    #[error("fit failed, collect the points again: {0}")]
    Fit(#[from] AffineError),
}

/// Where a test tap lands under the new calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preview {
    pub target: Pt2,
    /// Position as reported under the old calibration.
    pub reported: Pt2,
    /// Position under the new calibration.
    pub predicted: Pt2,
}

impl Preview {
    pub fn error(&self) -> Real {
        (self.predicted - self.target).norm()
    }
}

/// Everything needed to commit a confirmed calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub device: PointerDevice,
    pub fit: AffineFit,
}

/// Mutable container driving one calibration pass.
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    config: SessionConfig,
    state: SessionState,
    targets: Vec<Pt2>,
    test_targets: Vec<Pt2>,
    device: Option<PointerDevice>,
    old_inverse: Transform,
    samples: Vec<SamplePair>,
    fit: Option<AffineFit>,
    previews: Vec<Preview>,
}

impl CalibrationSession {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        if config.points < MIN_SAMPLES {
            return Err(SessionError::InvalidConfig(format!(
                "need at least {MIN_SAMPLES} calibration points, got {}",
                config.points
            )));
        }
        for margin in [config.margin, config.test_margin] {
            if !(0.0..0.5).contains(&margin) {
                return Err(SessionError::InvalidConfig(format!(
                    "margin must be in [0, 0.5), got {margin}"
                )));
            }
        }

        Ok(Self {
            targets: target_grid(config.points, config.margin),
            test_targets: target_grid(config.test_points, config.test_margin),
            config,
            state: SessionState::AwaitingDevice,
            device: None,
            old_inverse: Transform::identity(),
            samples: Vec::new(),
            fit: None,
            previews: Vec::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn targets(&self) -> &[Pt2] {
        &self.targets
    }

    pub fn device(&self) -> Option<&PointerDevice> {
        self.device.as_ref()
    }

    pub fn samples(&self) -> &[SamplePair] {
        &self.samples
    }

    pub fn fit(&self) -> Option<&AffineFit> {
        self.fit.as_ref()
    }

    pub fn previews(&self) -> &[Preview] {
        &self.previews
    }

    /// The target the sampler should display next, if any.
    pub fn current_request(&self) -> Option<TapRequest> {
        match self.state {
            SessionState::AwaitingPointTap(i) => Some(TapRequest {
                phase: TapPhase::Calibrate,
                index: i,
                total: self.targets.len(),
                target: self.targets[i],
            }),
            SessionState::AwaitingTestTap(i) => Some(TapRequest {
                phase: TapPhase::Test,
                index: i,
                total: self.test_targets.len(),
                target: self.test_targets[i],
            }),
            _ => None,
        }
    }

    /// Bind the device and the transform it currently applies.
    pub fn select_device(
        &mut self,
        device: PointerDevice,
        active: &Transform,
    ) -> Result<(), SessionError> {
        self.require_state(SessionState::AwaitingDevice, "select a device")?;
        self.old_inverse = active.inverse()?;
        info!("calibrating {:?} with {} targets", device.name, self.targets.len());
        self.device = Some(device);
        self.state = SessionState::AwaitingPointTap(0);
        Ok(())
    }

    /// Feed a sampler event.
    pub fn handle(&mut self, event: SamplerEvent) -> Result<SessionState, SessionError> {
        match event {
            SamplerEvent::Tap(p) => self.record_tap(p),
            SamplerEvent::Cancel => {
                self.cancel();
                Ok(self.state)
            }
        }
    }

    /// Record a tap for the current target (calibration or test phase).
    pub fn record_tap(&mut self, reported: Pt2) -> Result<SessionState, SessionError> {
        match self.state {
            SessionState::AwaitingPointTap(i) => {
                let raw = self.old_inverse.apply(&reported);
                debug!("target {i}: reported {reported} -> raw {raw}");
                self.samples.push(SamplePair::new(self.targets[i], raw));
                self.state = if i + 1 < self.targets.len() {
                    SessionState::AwaitingPointTap(i + 1)
                } else {
                    SessionState::Fitting
                };
            }
            SessionState::AwaitingTestTap(i) => {
                let fit = self.fit.ok_or(SessionError::InvalidTransition {
                    state: self.state,
                    action: "preview without a fit",
                })?;
                let preview = Preview {
                    target: self.test_targets[i],
                    reported,
                    predicted: self.old_inverse.then(&fit.transform).apply(&reported),
                };
                debug!("test {i}: {reported} -> {} (error {:.4})", preview.predicted, preview.error());
                self.previews.push(preview);
                self.state = if i + 1 < self.test_targets.len() {
                    SessionState::AwaitingTestTap(i + 1)
                } else {
                    SessionState::AwaitingConfirm
                };
            }
            state => {
                return Err(SessionError::InvalidTransition {
                    state,
                    action: "record a tap",
                })
            }
        }
        Ok(self.state)
    }

    /// Fit the collected samples.
    ///
    /// On failure the samples are discarded and collection restarts at the
    /// first target.
    pub fn run_fit(&mut self) -> Result<AffineFit, SessionError> {
        self.require_state(SessionState::Fitting, "fit")?;
        match fit_affine(&self.samples, self.config.disable_rotation) {
            Ok(fit) => {
                info!("fit quality {:.2}", fit.quality);
                self.fit = Some(fit);
                self.state = if self.test_targets.is_empty() {
                    SessionState::AwaitingConfirm
                } else {
                    SessionState::AwaitingTestTap(0)
                };
                Ok(fit)
            }
            Err(e) => {
                self.samples.clear();
                self.state = SessionState::AwaitingPointTap(0);
                Err(e.into())
            }
        }
    }

    /// Skip the remaining test taps.
    pub fn skip_test(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::AwaitingTestTap(_) => {
                self.state = SessionState::AwaitingConfirm;
                Ok(())
            }
            state => Err(SessionError::InvalidTransition {
                state,
                action: "skip the test phase",
            }),
        }
    }

    /// Accept or reject the fitted calibration.
    pub fn confirm(&mut self, accept: bool) -> Result<SessionState, SessionError> {
        self.require_state(SessionState::AwaitingConfirm, "confirm")?;
        if accept {
            self.state = SessionState::Done;
        } else {
            self.cancel();
        }
        Ok(self.state)
    }

    /// Abort from any non-terminal state, discarding collected data.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        debug!("session cancelled in state {:?}", self.state);
        self.samples.clear();
        self.previews.clear();
        self.fit = None;
        self.state = SessionState::Cancelled;
    }

    /// The confirmed result, available only in [`SessionState::Done`].
    pub fn result(&self) -> Option<SessionResult> {
        if self.state != SessionState::Done {
            return None;
        }
        Some(SessionResult {
            device: self.device.clone()?,
            fit: self.fit?,
        })
    }

    fn require_state(&self, state: SessionState, action: &'static str) -> Result<(), SessionError> {
        if self.state != state {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        Ok(())
    }
}
