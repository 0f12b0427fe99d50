//! Logging setup and configuration
//!
//! The hook is short-lived and runs under udev, so there is no global debug
//! switch: callers build a [`LogSettings`] once and hand it to
//! [`setup_logging`].

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Where log output goes and how verbose it is
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Emit debug-level tracing (skips, matching decisions, commands)
    #[serde(default)]
    pub debug: bool,
    /// Append to this file instead of writing to stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Default filter directive for these settings
    ///
    /// Failures are logged at `error` and dispatch problems at `warn`, so
    /// they stay visible with debug output turned off.
    pub fn level(&self) -> &'static str {
        if self.debug { "debug" } else { "warn" }
    }
}

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over the level derived from `settings`.
pub fn setup_logging(settings: &LogSettings) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.level()))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    let (writer, ansi) = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    crate::Error::Logging(format!(
                        "Failed to open log file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(ansi))
        .try_init()
        .map_err(|e| crate::Error::Logging(format!("Failed to install subscriber: {}", e)))?;

    Ok(())
}
