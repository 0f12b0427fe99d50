//! Device number discovery
//!
//! Mounts produced by conditional rules only know their sysfs path. The bus
//! number is part of that path; the device number has to be looked up in a
//! live USB topology listing.

use crate::config::TopologySettings;
use crate::error::{HotplugError, Result};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from a topology lister
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The lister could not be started at all
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The lister ran but reported failure
    #[error("'{program}' exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

/// Source of raw topology lines
pub trait TopologyLister {
    fn list_topology(&self) -> std::result::Result<Vec<String>, TopologyError>;
}

/// Runs an external listing tool (`lsusb -tvv` by default)
#[derive(Debug, Clone)]
pub struct CommandTopology {
    program: String,
    args: Vec<String>,
}

impl CommandTopology {
    pub fn new(settings: &TopologySettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
        }
    }
}

impl TopologyLister for CommandTopology {
    fn list_topology(&self) -> std::result::Result<Vec<String>, TopologyError> {
        debug!("running {} {}", self.program, self.args.join(" "));

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| TopologyError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TopologyError::Failed {
                program: self.program.clone(),
                status: output.status,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

/// Last `/`-separated segment of a path
pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Bus number encoded in a USB port path (`.../3-12.1` -> 3)
pub fn bus_number_from_path(device_path: &str) -> Result<u32> {
    let segment = last_segment(device_path);
    segment
        .split('-')
        .next()
        .and_then(|bus| bus.parse().ok())
        .ok_or_else(|| HotplugError::MalformedDevicePath {
            path: device_path.to_string(),
            segment: segment.to_string(),
        })
}

/// Find the device number for the port `port` in topology `lines`
///
/// A line matches when one of its tokens (other than the last) ends in the
/// port name. The device number is the last segment of the line's final
/// token, e.g. `/sys/bus/usb/devices/3-12.1  /dev/bus/usb/003/009` -> 9.
pub fn find_device_number<S: AsRef<str>>(lines: &[S], port: &str) -> Option<u32> {
    lines.iter().find_map(|line| {
        let tokens: Vec<&str> = line.as_ref().split_whitespace().collect();
        let (last, rest) = tokens.split_last()?;
        if !rest.iter().any(|token| last_segment(token) == port) {
            return None;
        }
        last_segment(last).parse().ok()
    })
}

/// Resolves bus/device numbers for configured device paths
pub struct DeviceProber<'a, L: TopologyLister + ?Sized> {
    lister: &'a L,
}

impl<'a, L: TopologyLister + ?Sized> DeviceProber<'a, L> {
    pub fn new(lister: &'a L) -> Self {
        Self { lister }
    }

    /// Returns `Ok(None)` when this one device cannot be located
    ///
    /// A path without a bus number or a lister that cannot be started is a
    /// hard failure.
    pub fn probe(&self, device_path: &str) -> Result<Option<(u32, u32)>> {
        let bus_number = bus_number_from_path(device_path)?;
        let port = last_segment(device_path);

        let lines = match self.lister.list_topology() {
            Ok(lines) => lines,
            Err(TopologyError::Spawn { program, source }) => {
                return Err(HotplugError::TopologyUnavailable { program, source });
            }
            Err(e) => {
                warn!("topology lookup for {} failed: {}", device_path, e);
                return Ok(None);
            }
        };

        match find_device_number(&lines, port) {
            Some(device_number) => {
                debug!(
                    "{} is bus {} device {}",
                    device_path, bus_number, device_number
                );
                Ok(Some((bus_number, device_number)))
            }
            None => {
                debug!("no topology entry for port {}", port);
                Ok(None)
            }
        }
    }
}
