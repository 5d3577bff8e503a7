//! Tap sources for the calibration session.
//!
//! A [`PointSampler`] shows a target and blocks until the user taps it or
//! cancels. Taps are reported as the device currently reports them, that is
//! in *calibrated* space under whatever transform is active; the session
//! removes that transform before recording a sample.

use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use touchcal_core::{Pt2, Real};

/// What happened while waiting for a tap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplerEvent {
    /// A tap at normalized device coordinates.
    Tap(Pt2),
    /// The user aborted (escape key, window closed, ...).
    Cancel,
}

/// Why a tap is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapPhase {
    Calibrate,
    Test,
}

/// One target to display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapRequest {
    pub phase: TapPhase,
    pub index: usize,
    pub total: usize,
    /// Normalized screen position of the target.
    pub target: Pt2,
}

/// Interactive target display and tap capture.
pub trait PointSampler {
    /// Display `request.target` and wait for the next event.
    fn next_event(&mut self, request: &TapRequest) -> Result<SamplerEvent>;
}

/// Replays a fixed event list; ends with [`SamplerEvent::Cancel`] when exhausted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSampler {
    events: VecDeque<SamplerEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Tap([Real; 2]),
    Keyword(String),
}

impl ScriptedSampler {
    pub fn new(events: impl IntoIterator<Item = SamplerEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn from_taps(taps: impl IntoIterator<Item = Pt2>) -> Self {
        Self::new(taps.into_iter().map(SamplerEvent::Tap))
    }

    /// Parse a JSON array of `[x, y]` taps; the string `"cancel"` aborts.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: Vec<ScriptEntry> =
            serde_json::from_str(json).context("tap script must be a JSON array")?;
        let events = entries
            .into_iter()
            .map(|entry| match entry {
                ScriptEntry::Tap([x, y]) => Ok(SamplerEvent::Tap(Pt2::new(x, y))),
                ScriptEntry::Keyword(k) if k.eq_ignore_ascii_case("cancel") => {
                    Ok(SamplerEvent::Cancel)
                }
                ScriptEntry::Keyword(k) => anyhow::bail!("unknown tap script entry {k:?}"),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(events))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read tap script {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("invalid tap script {}", path.display()))
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl PointSampler for ScriptedSampler {
    fn next_event(&mut self, _request: &TapRequest) -> Result<SamplerEvent> {
        Ok(self.events.pop_front().unwrap_or(SamplerEvent::Cancel))
    }
}

/// Line-oriented sampler for terminals.
///
/// Prompts on `output` and reads `x y` (or `x,y`) from `input`. Values are
/// divided by `extent` so device units can be typed directly; use `(1, 1)`
/// for normalized input. `q`, `esc`, `cancel` or end of input cancels.
pub struct LineSampler<R, W> {
    input: R,
    output: W,
    extent: (Real, Real),
}

impl<R: BufRead, W: Write> LineSampler<R, W> {
    pub fn new(input: R, output: W, extent: (Real, Real)) -> Self {
        Self {
            input,
            output,
            extent,
        }
    }

    fn prompt(&mut self, request: &TapRequest) -> Result<()> {
        let label = match request.phase {
            TapPhase::Calibrate => "target",
            TapPhase::Test => "test target",
        };
        write!(
            self.output,
            "{label} {}/{} at ({:.3}, {:.3}) > ",
            request.index + 1,
            request.total,
            request.target.x,
            request.target.y
        )?;
        self.output.flush()?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> PointSampler for LineSampler<R, W> {
    fn next_event(&mut self, request: &TapRequest) -> Result<SamplerEvent> {
        loop {
            self.prompt(request)?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(SamplerEvent::Cancel);
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if ["q", "esc", "cancel"].iter().any(|k| line.eq_ignore_ascii_case(k)) {
                return Ok(SamplerEvent::Cancel);
            }
            match parse_tap(line) {
                Some((x, y)) => {
                    return Ok(SamplerEvent::Tap(Pt2::new(x / self.extent.0, y / self.extent.1)))
                }
                None => writeln!(self.output, "expected two numbers, got {line:?}")?,
            }
        }
    }
}

fn parse_tap(line: &str) -> Option<(Real, Real)> {
    let mut parts = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse::<Real>);
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    if parts.next().is_some() || !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn request() -> TapRequest {
        TapRequest {
            phase: TapPhase::Calibrate,
            index: 0,
            total: 4,
            target: Pt2::new(0.1, 0.1),
        }
    }

    #[test]
    fn scripted_sampler_cancels_when_exhausted() {
        let mut s = ScriptedSampler::from_taps([Pt2::new(0.2, 0.3)]);
        assert_eq!(s.next_event(&request()).unwrap(), SamplerEvent::Tap(Pt2::new(0.2, 0.3)));
        assert_eq!(s.next_event(&request()).unwrap(), SamplerEvent::Cancel);
    }

    #[test]
    fn json_script_accepts_taps_and_cancel() {
        let mut s = ScriptedSampler::from_json_str(r#"[[0.1, 0.2], "cancel", [0.5, 0.5]]"#).unwrap();
        assert_eq!(s.remaining(), 3);
        assert_eq!(s.next_event(&request()).unwrap(), SamplerEvent::Tap(Pt2::new(0.1, 0.2)));
        assert_eq!(s.next_event(&request()).unwrap(), SamplerEvent::Cancel);
    }

    #[test]
    fn json_script_rejects_unknown_keywords() {
        let err = ScriptedSampler::from_json_str(r#"[[0.1, 0.2], "skip"]"#).unwrap_err();
        assert!(err.to_string().contains("skip"));
        assert!(ScriptedSampler::from_json_str("{}").is_err());
    }

    #[test]
    fn line_sampler_normalizes_by_extent() {
        let input = Cursor::new("\nnot a tap\n960, 540\n");
        let mut out = Vec::new();
        let mut s = LineSampler::new(input, &mut out, (1920.0, 1080.0));
        assert_eq!(s.next_event(&request()).unwrap(), SamplerEvent::Tap(Pt2::new(0.5, 0.5)));
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("target 1/4 at (0.100, 0.100)"));
        assert!(printed.contains("expected two numbers"));
    }

    #[test]
    fn line_sampler_cancels_on_escape_or_eof() {
        let mut s = LineSampler::new(Cursor::new("ESC\n"), Vec::new(), (1.0, 1.0));
        assert_eq!(s.next_event(&request()).unwrap(), SamplerEvent::Cancel);

        let mut s = LineSampler::new(Cursor::new(""), Vec::new(), (1.0, 1.0));
        assert_eq!(s.next_event(&request()).unwrap(), SamplerEvent::Cancel);
    }

    #[test]
    fn tap_parsing_is_strict() {
        assert_eq!(parse_tap("0.25 0.75"), Some((0.25, 0.75)));
        assert_eq!(parse_tap("0.25,0.75"), Some((0.25, 0.75)));
        assert_eq!(parse_tap("1 2 3"), None);
        assert_eq!(parse_tap("nan 1"), None);
        assert_eq!(parse_tap("1"), None);
    }
}
