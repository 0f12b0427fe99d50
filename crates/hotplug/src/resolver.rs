//! Device-to-domain resolution
//!
//! Domains are tried in configuration order. Within a domain, direct rules
//! win over conditional rules; the first match ends the search.

use crate::config::DomainRule;
use crate::error::Result;
use crate::stage::{SkipReason, Stage};
use crate::topology::{DeviceProber, TopologyLister};
use tracing::debug;

/// One device to attach or detach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDescriptor {
    pub device_path: String,
    pub bus_number: u32,
    pub device_number: u32,
}

/// Target domain and the devices to hand to it, in dispatch order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub domain: String,
    pub mounts: Vec<MountDescriptor>,
}

/// True if `candidate` is `configured` or lies below it
///
/// Matching is separator aware: `3-1` does not claim `3-11`.
pub fn is_prefix_or_equal(candidate: &str, configured: &str) -> bool {
    candidate
        .strip_prefix(configured)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Find the domain that owns `device_path` and the devices to mount for it
///
/// Direct rules use the event's own bus/device numbers and never consult the
/// topology lister. Conditional rules probe each of their target devices;
/// targets that cannot be located are dropped.
pub fn resolve<L: TopologyLister + ?Sized>(
    domains: &[DomainRule],
    device_path: &str,
    bus_number: u32,
    device_number: u32,
    prober: &DeviceProber<'_, L>,
) -> Result<Stage<Resolution>> {
    for domain in domains {
        if let Some(rule_path) = domain
            .devices
            .iter()
            .find(|path| is_prefix_or_equal(device_path, path))
        {
            debug!("{} matches {} of domain {}", device_path, rule_path, domain.name);

            let mounts = vec![MountDescriptor {
                device_path: device_path.to_string(),
                bus_number,
                device_number,
            }];

            return Ok(Stage::Continue(Resolution {
                domain: domain.name.clone(),
                mounts,
            }));
        }

        if let Some(rule) = domain
            .conditional
            .iter()
            .find(|rule| is_prefix_or_equal(device_path, &rule.when))
        {
            debug!(
                "{} triggers {} of domain {}",
                device_path, rule.when, domain.name
            );

            let mut mounts = Vec::with_capacity(rule.then.len());
            for path in &rule.then {
                match prober.probe(path)? {
                    Some((bus_number, device_number)) => mounts.push(MountDescriptor {
                        device_path: path.clone(),
                        bus_number,
                        device_number,
                    }),
                    None => debug!("skipping {}: device number not found", path),
                }
            }

            return Ok(Stage::Continue(Resolution {
                domain: domain.name.clone(),
                mounts,
            }));
        }
    }

    Ok(Stage::Skip(SkipReason::NoMatchingRule))
}
