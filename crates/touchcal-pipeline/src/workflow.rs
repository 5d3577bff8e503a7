//! End-to-end calibrate and activate flows.
//!
//! These functions wire the collaborators together:
//!
//! 1. resolve the device and read its active transform,
//! 2. drive a [`CalibrationSession`] with a [`PointSampler`],
//! 3. ask a [`Confirmer`] whether to keep the result,
//! 4. write the property and persist the record.
//!
//! Nothing is written to the device or to disk before step 4, so a cancelled
//! or rejected pass leaves both untouched.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use touchcal_linear::{residuals, AffineFit, MARGINAL_QUALITY};

use crate::device::{read_active_transform, select_device, write_transform, DeviceBackend};
use crate::sampler::PointSampler;
use crate::session::{CalibrationSession, Preview, SessionConfig, SessionError, SessionState};
use crate::store::CalibrationRecord;

/// Decides whether a fitted calibration is applied.
pub trait Confirmer {
    fn confirm(&mut self, fit: &AffineFit, previews: &[Preview]) -> Result<bool>;
}

/// Answers every confirmation with a fixed value.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl Confirmer for AutoConfirm {
    fn confirm(&mut self, _fit: &AffineFit, _previews: &[Preview]) -> Result<bool> {
        Ok(self.0)
    }
}

/// Yes/no prompt on a terminal; anything but `y`/`yes` rejects.
pub struct PromptConfirm<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptConfirm<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Confirmer for PromptConfirm<R, W> {
    fn confirm(&mut self, fit: &AffineFit, _previews: &[Preview]) -> Result<bool> {
        writeln!(self.output, "new calibration (quality {:.2}):", fit.quality)?;
        writeln!(self.output, "{}", fit.transform)?;
        write!(self.output, "apply it? [y/N] ")?;
        self.output.flush()?;

        let mut line = String::new();
        self.input.read_line(&mut line)?;
        let answer = line.trim();
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }
}

/// Options for [`run_calibration`].
#[derive(Debug, Clone, Default)]
pub struct CalibrateOptions {
    /// Exact device name; `None` picks a touch device.
    pub device_name: Option<String>,
    pub session: SessionConfig,
    /// Where to persist the confirmed record; `None` skips saving.
    pub record_path: Option<PathBuf>,
    /// Fit and preview only: no device write, no save.
    pub dry_run: bool,
}

/// How a calibration pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    /// Confirmed; `applied` is false for dry runs.
    Confirmed {
        record: CalibrationRecord,
        fit: AffineFit,
        applied: bool,
    },
    /// The user rejected the fit.
    Rejected,
    /// The user cancelled while tapping.
    Cancelled,
}

/// Run one interactive calibration pass.
pub fn run_calibration(
    backend: &mut dyn DeviceBackend,
    sampler: &mut dyn PointSampler,
    confirmer: &mut dyn Confirmer,
    opts: &CalibrateOptions,
) -> Result<CalibrationOutcome> {
    let mut session = CalibrationSession::new(opts.session.clone())?;

    let device = select_device(backend, opts.device_name.as_deref())?;
    let active = read_active_transform(backend, &device, false)
        .with_context(|| format!("failed to read calibration of {:?}", device.name))?;
    session.select_device(device, &active.transform)?;

    let fit = loop {
        if let Some(request) = session.current_request() {
            let event = sampler.next_event(&request)?;
            session.handle(event)?;
            continue;
        }
        match session.state() {
            SessionState::Fitting => match session.run_fit() {
                Ok(fit) => report_fit(&session, &fit),
                Err(e @ SessionError::Fit(_)) => warn!("{e}"),
                Err(e) => return Err(e.into()),
            },
            SessionState::AwaitingConfirm => {
                break session
                    .fit()
                    .copied()
                    .context("session reached confirmation without a fit")?;
            }
            SessionState::Cancelled => {
                info!("calibration cancelled; nothing was changed");
                return Ok(CalibrationOutcome::Cancelled);
            }
            state => anyhow::bail!("calibration stalled in state {state:?}"),
        }
    };

    report_previews(session.previews());
    let accepted = confirmer.confirm(&fit, session.previews())?;
    session.confirm(accepted)?;
    let Some(result) = session.result() else {
        info!("calibration rejected; nothing was changed");
        return Ok(CalibrationOutcome::Rejected);
    };

    let record = CalibrationRecord::new(result.device.name.clone(), result.fit.transform);
    if opts.dry_run {
        info!("dry run: not applying calibration");
        return Ok(CalibrationOutcome::Confirmed {
            record,
            fit,
            applied: false,
        });
    }

    write_transform(backend, &result.device, &result.fit.transform)?;
    if let Some(path) = &opts.record_path {
        record
            .save(path)
            .context("calibration was applied but could not be saved")?;
    }

    Ok(CalibrationOutcome::Confirmed {
        record,
        fit,
        applied: true,
    })
}

/// Re-apply the last saved calibration.
///
/// The target device must exist and expose a valid calibration property.
pub fn run_activate(backend: &mut dyn DeviceBackend, record_path: &Path) -> Result<CalibrationRecord> {
    let record = CalibrationRecord::load(record_path)?;
    let device = select_device(backend, Some(&record.device_name))?;
    read_active_transform(backend, &device, true)?;
    write_transform(backend, &device, &record.transform)?;
    info!("activated saved calibration on {:?}", device.name);
    Ok(record)
}

fn report_fit(session: &CalibrationSession, fit: &AffineFit) {
    info!("fitted transform:\n{}", fit.transform);
    for (pair, err) in session.samples().iter().zip(residuals(&fit.transform, session.samples())) {
        info!("  target {} residual {err:.5}", pair.screen);
    }
    if fit.is_marginal() {
        warn!(
            "fit quality {:.2} is below {MARGINAL_QUALITY}; consider recalibrating",
            fit.quality
        );
    }
}

fn report_previews(previews: &[Preview]) {
    for p in previews {
        info!(
            "  test target {} -> {} (error {:.5})",
            p.target,
            p.predicted,
            p.error()
        );
    }
}
