//! Hotplug error types
//!
//! Only hard failures live here. Irrelevant events are not errors; they flow
//! through [`Stage::Skip`](crate::Stage) instead.

use thiserror::Error;

/// Process exit code for a hard failure
pub const FAILURE_EXIT_CODE: u8 = 2;

/// Failures that abort the whole invocation
#[derive(Debug, Error)]
pub enum HotplugError {
    /// `ACTION` was not present in the environment at all
    #[error("ACTION is not set")]
    MissingAction,

    /// `DEVPATH` could not be turned into a canonical absolute path
    #[error("Invalid device path '{path}': {reason}")]
    InvalidDevicePath { path: String, reason: String },

    /// A configured device path has no parseable bus number
    #[error("Malformed device path '{path}': cannot derive bus number from '{segment}'")]
    MalformedDevicePath { path: String, segment: String },

    /// The topology lister could not be started
    #[error("Failed to run topology lister '{program}': {source}")]
    TopologyUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl HotplugError {
    pub fn exit_code(&self) -> u8 {
        FAILURE_EXIT_CODE
    }
}

pub type Result<T> = std::result::Result<T, HotplugError>;
