use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use touchcal_core::Real;
use touchcal_linear::AffineFit;
use touchcal_pipeline::{
    default_record_path, run_activate, run_calibration, AutoConfirm, CalibrateOptions,
    CalibrationOutcome, Confirmer, LineSampler, PointSampler, Preview, PromptConfirm,
    SamplerEvent, ScriptedSampler, SessionConfig, TapRequest, XInputBackend,
};

/// Touchscreen calibration for X input devices.
#[derive(Debug, Parser)]
#[command(author, version, about = "Fit and apply a touchscreen calibration matrix")]
struct Args {
    /// Re-apply the last saved calibration instead of calibrating.
    #[arg(long)]
    activate: bool,

    /// Fit scale and offset only.
    #[arg(long)]
    no_rotation: bool,

    /// Exact device name. Defaults to the first device named like "touch".
    #[arg(long, value_name = "NAME")]
    device: Option<String>,

    /// Number of calibration targets.
    #[arg(long)]
    points: Option<usize>,

    /// Number of test taps shown before confirming.
    #[arg(long)]
    test_points: Option<usize>,

    /// Optional TOML file with session options. Flags take precedence.
    #[arg(long, value_name = "PATH")]
    session: Option<PathBuf>,

    /// Replay taps from a JSON array instead of reading them from stdin.
    #[arg(long, value_name = "PATH")]
    taps: Option<PathBuf>,

    /// Screen size in device units, e.g. 1920x1080; typed taps are divided by it.
    #[arg(long, value_name = "WxH", value_parser = parse_extent)]
    device_size: Option<(Real, Real)>,

    /// Calibration file. Defaults to $XDG_CONFIG_HOME/touchcal/calibration.toml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Fit and preview without touching the device or the calibration file.
    #[arg(long)]
    dry_run: bool,

    /// Apply the fit without asking.
    #[arg(long)]
    yes: bool,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.session {
            Some(path) => load_session_config(path)?,
            None => SessionConfig::default(),
        };
        if let Some(points) = self.points {
            config.points = points;
        }
        if let Some(test_points) = self.test_points {
            config.test_points = test_points;
        }
        config.disable_rotation |= self.no_rotation;
        Ok(config)
    }

    fn record_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(default_record_path()?),
        }
    }
}

fn load_session_config(path: &Path) -> Result<SessionConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read session options {}", path.display()))?;
    toml::from_str(&data).with_context(|| format!("invalid session options {}", path.display()))
}

fn parse_extent(value: &str) -> Result<(Real, Real), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {value:?}"))?;
    let parse = |s: &str| match s.trim().parse::<Real>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(format!("invalid dimension {s:?} in {value:?}")),
    };
    Ok((parse(w)?, parse(h)?))
}

/// Reads taps from stdin, locking it only while waiting for a line.
struct StdinSampler {
    extent: (Real, Real),
}

impl PointSampler for StdinSampler {
    fn next_event(&mut self, request: &TapRequest) -> Result<SamplerEvent> {
        LineSampler::new(io::stdin().lock(), io::stderr(), self.extent).next_event(request)
    }
}

struct StdinConfirm;

impl Confirmer for StdinConfirm {
    fn confirm(&mut self, fit: &AffineFit, previews: &[Preview]) -> Result<bool> {
        PromptConfirm::new(io::stdin().lock(), io::stderr()).confirm(fit, previews)
    }
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut backend = XInputBackend::new();
    let record_path = args.record_path()?;

    if args.activate {
        let record = run_activate(&mut backend, &record_path)?;
        println!("applied saved calibration to {}", record.device_name);
        return Ok(());
    }

    let opts = CalibrateOptions {
        device_name: args.device.clone(),
        session: args.session_config()?,
        record_path: Some(record_path),
        dry_run: args.dry_run,
    };

    let mut sampler: Box<dyn PointSampler> = match &args.taps {
        Some(path) => Box::new(ScriptedSampler::from_json_file(path)?),
        None => Box::new(StdinSampler {
            extent: args.device_size.unwrap_or((1.0, 1.0)),
        }),
    };
    let mut confirmer: Box<dyn Confirmer> = if args.yes {
        Box::new(AutoConfirm(true))
    } else {
        Box::new(StdinConfirm)
    };

    match run_calibration(&mut backend, sampler.as_mut(), confirmer.as_mut(), &opts)? {
        CalibrationOutcome::Confirmed {
            record,
            fit,
            applied,
        } => {
            println!("{}", record.transform);
            let verb = if applied { "applied to" } else { "computed for" };
            println!(
                "calibration {verb} {} (quality {:.2})",
                record.device_name, fit.quality
            );
        }
        CalibrationOutcome::Rejected => println!("calibration discarded"),
        CalibrationOutcome::Cancelled => println!("calibration cancelled"),
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}
