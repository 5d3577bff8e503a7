//! [`DeviceBackend`] over the `xinput` command-line client.

use std::process::{Command, Output};

use log::debug;
use touchcal_core::Real;

use crate::device::{DeviceBackend, DeviceError, PointerDevice, MATRIX_PROPERTY};

/// Talks to the X server through the `xinput` executable.
#[derive(Debug, Clone)]
pub struct XInputBackend {
    program: String,
}

impl XInputBackend {
    pub fn new() -> Self {
        Self::with_program("xinput")
    }

    /// Use a different executable (wrapper scripts, absolute paths).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, DeviceError> {
        debug!("running {} {}", self.program, args.join(" "));
        Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| DeviceError::Backend(format!("failed to run {}: {e}", self.program)))
    }

    fn run_checked(&self, args: &[&str]) -> Result<String, DeviceError> {
        let out = self.run(args)?;
        if !out.status.success() {
            return Err(DeviceError::Backend(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

impl Default for XInputBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for XInputBackend {
    fn list_pointers(&mut self) -> Result<Vec<PointerDevice>, DeviceError> {
        let out = self.run_checked(&["list", "--short"])?;
        Ok(parse_pointer_list(&out))
    }

    fn get_matrix(&mut self, device: &PointerDevice) -> Result<Option<String>, DeviceError> {
        let id = device.id.to_string();
        let out = self.run_checked(&["list-props", &id])?;
        Ok(find_property(&out, MATRIX_PROPERTY))
    }

    fn set_matrix(&mut self, device: &PointerDevice, values: &[Real; 9]) -> Result<(), DeviceError> {
        let id = device.id.to_string();
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let mut args = vec!["set-prop", id.as_str(), "--type=float", MATRIX_PROPERTY];
        args.extend(values.iter().map(String::as_str));

        let out = self.run(&args).map_err(|e| DeviceError::PropertyWriteFailed {
            device: device.name.clone(),
            reason: e.to_string(),
        })?;
        if !out.status.success() {
            return Err(DeviceError::PropertyWriteFailed {
                device: device.name.clone(),
                reason: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Extract slave pointers from `xinput list --short`.
///
/// Lines look like `⎜   ↳ ELAN Touchscreen    id=10   [slave  pointer  (2)]`.
pub fn parse_pointer_list(output: &str) -> Vec<PointerDevice> {
    output
        .lines()
        .filter(|line| line.contains("slave  pointer"))
        .filter_map(|line| {
            let (head, tail) = line.split_once("id=")?;
            let id = tail
                .split(|c: char| !c.is_ascii_digit())
                .next()?
                .parse()
                .ok()?;
            let name = head
                .trim_start_matches(|c: char| c.is_whitespace() || "⎡⎜⎣↳".contains(c))
                .trim();
            if name.is_empty() || name.starts_with("Virtual core XTEST") {
                return None;
            }
            Some(PointerDevice {
                id,
                name: name.to_string(),
            })
        })
        .collect()
}

/// Find `name (NNN):\tvalue` in `xinput list-props` output.
pub fn find_property(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(name)?;
        let rest = rest.trim_start();
        if !rest.starts_with('(') {
            return None;
        }
        let (_, value) = rest.split_once(':')?;
        Some(value.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
⎡ Virtual core pointer                    \tid=2\t[master pointer  (3)]
⎜   ↳ Virtual core XTEST pointer              \tid=4\t[slave  pointer  (2)]
⎜   ↳ Logitech USB Optical Mouse              \tid=9\t[slave  pointer  (2)]
⎜   ↳ ELAN Touchscreen                        \tid=10\t[slave  pointer  (2)]
⎣ Virtual core keyboard                   \tid=3\t[master keyboard (2)]
    ↳ Virtual core XTEST keyboard             \tid=5\t[slave  keyboard (3)]
";

    const PROPS: &str = "\
Device 'ELAN Touchscreen':
\tDevice Enabled (187):\t1
\tCoordinate Transformation Matrix (189):\t1.100000, 0.000000, -0.050000, 0.000000, 0.900000, 0.020000, 0.000000, 0.000000, 1.000000
\tlibinput Calibration Matrix (321):\t1.000000, 0.000000, 0.000000, 0.000000, 1.000000, 0.000000, 0.000000, 0.000000, 1.000000
";

    #[test]
    fn list_keeps_real_slave_pointers() {
        let devices = parse_pointer_list(LIST);
        assert_eq!(
            devices,
            vec![
                PointerDevice {
                    id: 9,
                    name: "Logitech USB Optical Mouse".to_string()
                },
                PointerDevice {
                    id: 10,
                    name: "ELAN Touchscreen".to_string()
                },
            ]
        );
    }

    #[test]
    fn matrix_property_is_found_by_name() {
        let value = find_property(PROPS, MATRIX_PROPERTY).unwrap();
        assert!(value.starts_with("1.100000, 0.000000, -0.050000"));
        let parsed = crate::device::parse_matrix_property(&value).unwrap();
        assert_eq!(parsed[2], -0.05);
    }

    #[test]
    fn missing_property_is_none() {
        let props = "Device 'Mouse':\n\tDevice Enabled (187):\t1\n";
        assert_eq!(find_property(props, MATRIX_PROPERTY), None);
    }

    #[test]
    fn missing_executable_is_a_backend_error() {
        let mut backend = XInputBackend::with_program("/nonexistent/xinput-for-tests");
        assert!(matches!(
            backend.list_pointers(),
            Err(DeviceError::Backend(_))
        ));
        let device = PointerDevice {
            id: 1,
            name: "x".to_string(),
        };
        assert!(matches!(
            backend.set_matrix(&device, &[0.0; 9]),
            Err(DeviceError::PropertyWriteFailed { .. })
        ));
    }
}
