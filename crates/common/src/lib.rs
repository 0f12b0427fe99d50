//! Common utilities for libvirt-usb-hotplug
//!
//! This crate provides the ambient pieces shared by the hotplug hook:
//! error handling and the tracing subscriber setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{LogSettings, setup_logging};
