//! udev event reader
//!
//! Builds an [`Event`] from the variables udev exports to `RUN` programs.
//! Absent and empty variables are treated the same way.

use crate::error::{HotplugError, Result};
use crate::stage::{SkipReason, Stage};
use std::env;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const ACTION: &str = "ACTION";
pub const SUBSYSTEM: &str = "SUBSYSTEM";
pub const BUSNUM: &str = "BUSNUM";
pub const DEVNUM: &str = "DEVNUM";
pub const DEVPATH: &str = "DEVPATH";
pub const ID_MODEL: &str = "ID_MODEL";
pub const ID_MODEL_FROM_DATABASE: &str = "ID_MODEL_FROM_DATABASE";

/// A single device event as seen by the hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Raw `ACTION`; mapped to [`Action`](crate::filter::Action) by the filter
    pub action: String,
    pub subsystem: String,
    pub bus_number: u32,
    pub device_number: u32,
    /// Canonical sysfs-relative device path, e.g. `/devices/pci0000:00/.../usb3/3-11`
    pub device_path: String,
    /// Non-empty `ID_MODEL` / `ID_MODEL_FROM_DATABASE` values
    pub model_hints: Vec<String>,
}

impl Event {
    /// Read the event from the process environment
    pub fn from_env(sysfs_root: &Path) -> Result<Stage<Event>> {
        Self::from_vars(|name| env::var(name).ok(), sysfs_root)
    }

    /// Read the event through an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F, sysfs_root: &Path) -> Result<Stage<Event>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let action = var(ACTION).ok_or(HotplugError::MissingAction)?;
        let subsystem = var(SUBSYSTEM).unwrap_or_default();
        let Some(bus_number) = parse_number(BUSNUM, var(BUSNUM)) else {
            return Ok(Stage::Skip(SkipReason::MissingField(BUSNUM)));
        };
        let Some(device_number) = parse_number(DEVNUM, var(DEVNUM)) else {
            return Ok(Stage::Skip(SkipReason::MissingField(DEVNUM)));
        };

        let Some(raw_path) = var(DEVPATH) else {
            return Ok(Stage::Skip(SkipReason::MissingField(DEVPATH)));
        };
        let device_path = canonical_device_path(sysfs_root, &raw_path)?;

        let model_hints = [ID_MODEL, ID_MODEL_FROM_DATABASE]
            .into_iter()
            .filter_map(&var)
            .collect();

        Ok(Stage::Continue(Event {
            action,
            subsystem,
            bus_number,
            device_number,
            device_path,
            model_hints,
        }))
    }
}

fn parse_number(name: &str, value: Option<String>) -> Option<u32> {
    let value = value?;
    match value.trim().parse() {
        Ok(number) => Some(number),
        Err(e) => {
            debug!("ignoring {}='{}': {}", name, value, e);
            None
        }
    }
}

/// Resolve `devpath` (relative to `sysfs_root`) to its canonical form
///
/// Symlinks are followed when the sysfs node still exists. On `remove` the
/// node is usually gone already, in which case the lexically normalized path
/// is returned.
pub fn canonical_device_path(sysfs_root: &Path, devpath: &str) -> Result<String> {
    let invalid = |reason: &str| HotplugError::InvalidDevicePath {
        path: devpath.to_string(),
        reason: reason.to_string(),
    };

    if !devpath.starts_with('/') {
        return Err(invalid("not an absolute path"));
    }

    let normalized = normalize(devpath);
    let root = fs::canonicalize(sysfs_root).unwrap_or_else(|_| sysfs_root.to_path_buf());
    let node = root.join(normalized.trim_start_matches('/'));

    match fs::canonicalize(&node) {
        Ok(resolved) => {
            let relative = resolved
                .strip_prefix(&root)
                .map_err(|_| invalid("resolves outside of sysfs"))?;
            let relative = relative.to_str().ok_or_else(|| invalid("not valid UTF-8"))?;
            Ok(format!("/{}", relative))
        }
        Err(e) => {
            debug!("{} not resolvable ({}), using {}", node.display(), e, normalized);
            Ok(normalized)
        }
    }
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}
