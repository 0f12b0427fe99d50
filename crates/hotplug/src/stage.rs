//! Per-stage results
//!
//! Every stage of the hook returns `Result<Stage<T>>`: `Ok(Continue)` hands
//! its output to the next stage, `Ok(Skip)` ends the invocation successfully
//! and `Err` ends it with a failure exit code.

use std::fmt;

/// Outcome of a single pipeline stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage<T> {
    /// Keep going with this value
    Continue(T),
    /// The event is irrelevant; stop without doing anything
    Skip(SkipReason),
}

/// Why an event was ignored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A required udev variable was absent or empty
    MissingField(&'static str),
    /// `SUBSYSTEM` was something other than `usb`
    WrongSubsystem(String),
    /// A model hint identifies the device as a hub
    HubDevice(String),
    /// `ACTION` was neither `add` nor `remove`
    UnsupportedAction(String),
    /// No configured domain claims this device
    NoMatchingRule,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(name) => write!(f, "{} is not set", name),
            Self::WrongSubsystem(subsystem) => {
                write!(f, "don't care about SUBSYSTEM '{}'", subsystem)
            }
            Self::HubDevice(model) => write!(f, "device '{}' is a hub", model),
            Self::UnsupportedAction(action) => write!(f, "unsupported ACTION '{}'", action),
            Self::NoMatchingRule => write!(f, "udev event doesn't match any device in config"),
        }
    }
}
