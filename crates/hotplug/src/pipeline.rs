//! Single-event pipeline: read, filter, resolve, dispatch

use crate::config::HotplugConfig;
use crate::dispatch::{DispatchReport, Hypervisor, dispatch};
use crate::error::Result;
use crate::event::Event;
use crate::filter::{Action, classify};
use crate::resolver::resolve;
use crate::stage::{SkipReason, Stage};
use crate::topology::{DeviceProber, TopologyLister};
use std::env;
use tracing::debug;

/// How an invocation ended, short of a hard failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event was irrelevant
    Skipped(SkipReason),
    /// Mounts for `domain` were dispatched; see `report` for per-device results
    Handled {
        action: Action,
        domain: String,
        report: DispatchReport,
    },
}

/// Handles one udev event against a fixed configuration
pub struct Hotplug<'a, L: ?Sized, H: ?Sized> {
    config: &'a HotplugConfig,
    lister: &'a L,
    hypervisor: &'a H,
}

impl<'a, L, H> Hotplug<'a, L, H>
where
    L: TopologyLister + ?Sized,
    H: Hypervisor + ?Sized,
{
    pub fn new(config: &'a HotplugConfig, lister: &'a L, hypervisor: &'a H) -> Self {
        Self {
            config,
            lister,
            hypervisor,
        }
    }

    /// Handle the event described by the process environment
    pub fn handle_env(&self) -> Result<Outcome> {
        self.handle_vars(|name| env::var(name).ok())
    }

    /// Handle the event described by `lookup`
    pub fn handle_vars<F>(&self, lookup: F) -> Result<Outcome>
    where
        F: Fn(&str) -> Option<String>,
    {
        let event = match Event::from_vars(lookup, &self.config.udev.sysfs_root)? {
            Stage::Continue(event) => event,
            Stage::Skip(reason) => return Ok(Self::skipped(reason)),
        };
        debug!("event: {:?}", event);

        let action = match classify(&event) {
            Stage::Continue(action) => action,
            Stage::Skip(reason) => return Ok(Self::skipped(reason)),
        };

        let prober = DeviceProber::new(self.lister);
        let resolution = match resolve(
            &self.config.domains,
            &event.device_path,
            event.bus_number,
            event.device_number,
            &prober,
        )? {
            Stage::Continue(resolution) => resolution,
            Stage::Skip(reason) => return Ok(Self::skipped(reason)),
        };

        let report = dispatch(self.hypervisor, action, &resolution);

        Ok(Outcome::Handled {
            action,
            domain: resolution.domain,
            report,
        })
    }

    fn skipped(reason: SkipReason) -> Outcome {
        debug!("skipping event: {}", reason);
        Outcome::Skipped(reason)
    }
}
