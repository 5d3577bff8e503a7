//! Device enumeration and calibration-property access.
//!
//! The calibration lives in a per-device property holding 9 comma-separated
//! floats in row-major order. [`DeviceBackend`] abstracts the protocol client;
//! [`XInputBackend`](crate::XInputBackend) talks to a running X server and
//! [`MemoryBackend`] keeps everything in process for tests and dry runs.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use thiserror::Error;
use touchcal_core::{Real, Transform};

/// Name of the X Input calibration property.
pub const MATRIX_PROPERTY: &str = "Coordinate Transformation Matrix";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("no pointer input devices found")]
    NoDevicesFound,
    #[error("no pointer device named {0:?}")]
    DeviceNotFound(String),
    #[error("device {device:?} has no \"Coordinate Transformation Matrix\" property")]
    PropertyUnset { device: String },
    #[error("device {device:?} reported an invalid calibration matrix {value:?}: {reason}")]
    InvalidProperty {
        device: String,
        value: String,
        reason: String,
    },
    #[error("failed to write calibration matrix to {device:?}: {reason}")]
    PropertyWriteFailed { device: String, reason: String },
    #[error("device backend failed: {0}")]
    Backend(String),
}

/// A pointer-class input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerDevice {
    pub id: u32,
    pub name: String,
}

/// Protocol client for pointer devices and their calibration property.
pub trait DeviceBackend {
    /// Enumerate pointer-class devices.
    fn list_pointers(&mut self) -> Result<Vec<PointerDevice>, DeviceError>;

    /// Read the raw property string, `None` if the device does not carry it.
    fn get_matrix(&mut self, device: &PointerDevice) -> Result<Option<String>, DeviceError>;

    /// Write 9 row-major values in one call.
    fn set_matrix(&mut self, device: &PointerDevice, values: &[Real; 9]) -> Result<(), DeviceError>;
}

/// Pick the first device whose name contains "touch" (any case), else the first one.
pub fn select_default(devices: &[PointerDevice]) -> Option<&PointerDevice> {
    devices
        .iter()
        .find(|d| d.name.to_lowercase().contains("touch"))
        .or_else(|| devices.first())
}

/// Resolve the device to calibrate.
///
/// With `name` the match is exact; otherwise [`select_default`] applies.
pub fn select_device(
    backend: &mut dyn DeviceBackend,
    name: Option<&str>,
) -> Result<PointerDevice, DeviceError> {
    let devices = backend.list_pointers()?;
    debug!("enumerated {} pointer device(s)", devices.len());
    if devices.is_empty() {
        return Err(DeviceError::NoDevicesFound);
    }

    let selected = match name {
        Some(name) => devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?,
        None => select_default(&devices).ok_or(DeviceError::NoDevicesFound)?,
    };
    info!("using device {:?} (id {})", selected.name, selected.id);
    Ok(selected.clone())
}

/// Parse `"a, b, c, ..."` into exactly 9 floats.
pub fn parse_matrix_property(value: &str) -> Result<[Real; 9], String> {
    let parsed = value
        .split(',')
        .map(|s| s.trim().parse::<Real>().map_err(|e| format!("{s:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    let values: [Real; 9] = parsed
        .try_into()
        .map_err(|v: Vec<Real>| format!("expected 9 values, got {}", v.len()))?;
    if values.iter().any(|v| !v.is_finite()) {
        return Err("non-finite value".to_string());
    }
    Ok(values)
}

/// Format 9 floats as the comma-separated property string.
pub fn format_matrix_property(values: &[Real; 9]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where the active transform came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformSource {
    Property,
    /// Property absent; identity assumed.
    DefaultIdentity,
}

/// The calibration currently applied by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveTransform {
    pub transform: Transform,
    pub source: TransformSource,
}

/// Read the active transform.
///
/// An absent property is not an error unless `require` is set: the identity
/// is returned and a notice is logged. A present but malformed value is
/// always an error.
pub fn read_active_transform(
    backend: &mut dyn DeviceBackend,
    device: &PointerDevice,
    require: bool,
) -> Result<ActiveTransform, DeviceError> {
    let Some(value) = backend.get_matrix(device)? else {
        if require {
            return Err(DeviceError::PropertyUnset {
                device: device.name.clone(),
            });
        }
        warn!(
            "{:?} has no {MATRIX_PROPERTY:?}; assuming identity",
            device.name
        );
        return Ok(ActiveTransform {
            transform: Transform::identity(),
            source: TransformSource::DefaultIdentity,
        });
    };

    let values = parse_matrix_property(&value).map_err(|reason| DeviceError::InvalidProperty {
        device: device.name.clone(),
        value: value.clone(),
        reason,
    })?;
    debug!("active matrix on {:?}: {value}", device.name);
    Ok(ActiveTransform {
        transform: Transform::from_row_major(values),
        source: TransformSource::Property,
    })
}

/// Write `transform` to the device. Failures are surfaced, never retried.
pub fn write_transform(
    backend: &mut dyn DeviceBackend,
    device: &PointerDevice,
    transform: &Transform,
) -> Result<(), DeviceError> {
    let values = transform.to_row_major();
    info!(
        "writing {MATRIX_PROPERTY:?} on {:?}: {}",
        device.name,
        format_matrix_property(&values)
    );
    backend.set_matrix(device, &values)
}

/// In-process backend.
///
/// Properties are stored as strings so malformed values can be simulated.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    devices: Vec<PointerDevice>,
    properties: BTreeMap<u32, String>,
    fail_writes: bool,
    writes: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device; `matrix` is its initial property value, if any.
    pub fn with_device(mut self, id: u32, name: &str, matrix: Option<&str>) -> Self {
        self.devices.push(PointerDevice {
            id,
            name: name.to_string(),
        });
        if let Some(m) = matrix {
            self.properties.insert(id, m.to_string());
        }
        self
    }

    /// Make every subsequent write fail.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn property(&self, id: u32) -> Option<&str> {
        self.properties.get(&id).map(String::as_str)
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl DeviceBackend for MemoryBackend {
    fn list_pointers(&mut self) -> Result<Vec<PointerDevice>, DeviceError> {
        Ok(self.devices.clone())
    }

    fn get_matrix(&mut self, device: &PointerDevice) -> Result<Option<String>, DeviceError> {
        Ok(self.properties.get(&device.id).cloned())
    }

    fn set_matrix(&mut self, device: &PointerDevice, values: &[Real; 9]) -> Result<(), DeviceError> {
        if self.fail_writes || !self.devices.iter().any(|d| d.id == device.id) {
            return Err(DeviceError::PropertyWriteFailed {
                device: device.name.clone(),
                reason: "device unavailable".to_string(),
            });
        }
        self.properties
            .insert(device.id, format_matrix_property(values));
        self.writes += 1;
        Ok(())
    }
}
