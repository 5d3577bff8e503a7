//! Persisted calibration records.
//!
//! A record is a small TOML file with two sections:
//!
//! ```toml
//! [Device]
//! Name = "ELAN Touchscreen"
//!
//! [Matrix]
//! a0 = 1.1
//! a1 = 0.0
//! a2 = -0.05
//! b0 = 0.0
//! b1 = 0.9
//! b2 = 0.02
//! c0 = 0.0
//! c1 = 0.0
//! c2 = 1.0
//! ```
//!
//! `a`, `b`, `c` are the matrix rows, so the keys read row-major.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use atomicwrites::{AtomicFile, OverwriteBehavior};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use touchcal_core::{Real, Transform};

const APP_DIR: &str = "touchcal";
const FILE_NAME: &str = "calibration.toml";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not a valid calibration file: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to encode calibration record: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("no per-user configuration directory (set XDG_CONFIG_HOME or HOME)")]
    NoConfigDir,
}

/// The persisted unit: which device, and the matrix to apply to it.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    pub device_name: String,
    pub transform: Transform,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    #[serde(rename = "Device")]
    device: DeviceSection,
    #[serde(rename = "Matrix")]
    matrix: MatrixSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceSection {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MatrixSection {
    a0: Real,
    a1: Real,
    a2: Real,
    b0: Real,
    b1: Real,
    b2: Real,
    c0: Real,
    c1: Real,
    c2: Real,
}

impl From<&CalibrationRecord> for RecordFile {
    fn from(record: &CalibrationRecord) -> Self {
        let [a0, a1, a2, b0, b1, b2, c0, c1, c2] = record.transform.to_row_major();
        Self {
            device: DeviceSection {
                name: record.device_name.clone(),
            },
            matrix: MatrixSection {
                a0,
                a1,
                a2,
                b0,
                b1,
                b2,
                c0,
                c1,
                c2,
            },
        }
    }
}

impl From<RecordFile> for CalibrationRecord {
    fn from(file: RecordFile) -> Self {
        let m = file.matrix;
        Self {
            device_name: file.device.name,
            transform: Transform::from_row_major([
                m.a0, m.a1, m.a2, m.b0, m.b1, m.b2, m.c0, m.c1, m.c2,
            ]),
        }
    }
}

impl CalibrationRecord {
    pub fn new(device_name: impl Into<String>, transform: Transform) -> Self {
        Self {
            device_name: device_name.into(),
            transform,
        }
    }

    pub fn to_toml_string(&self) -> Result<String, StoreError> {
        Ok(toml::to_string(&RecordFile::from(self))?)
    }

    /// Parse a record; `path` is only used in error messages.
    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, StoreError> {
        let file: RecordFile = toml::from_str(contents).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file.into())
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let contents = fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let record = Self::from_toml_str(&contents, path)?;
        debug!("loaded calibration for {:?} from {}", record.device_name, path.display());
        Ok(record)
    }

    /// Write the record, replacing any previous file in one rename.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let contents = self.to_toml_string()?;
        let write_err = |source: io::Error| StoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
            .write(|f| {
                f.write_all(contents.as_bytes())?;
                f.flush()
            })
            .map_err(|err| match err {
                atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => write_err(e),
            })?;

        info!("saved calibration for {:?} to {}", self.device_name, path.display());
        Ok(())
    }
}

/// `<config dir>/touchcal/calibration.toml`; on Linux the config dir is
/// `$XDG_CONFIG_HOME`, falling back to `$HOME/.config`.
pub fn default_record_path() -> Result<PathBuf, StoreError> {
    let base = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
    Ok(base.join(APP_DIR).join(FILE_NAME))
}
