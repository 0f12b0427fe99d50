//! udev hotplug bridge between host USB ports and libvirt domains
//!
//! Invoked once per udev event. The event is read from the environment,
//! filtered, matched against per-domain port rules and turned into
//! `virsh attach-device`/`detach-device` calls. Nothing is kept between
//! invocations.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod pipeline;
pub mod resolver;
pub mod stage;
pub mod topology;

pub use config::{ConditionalRule, DomainRule, HotplugConfig};
pub use dispatch::{DispatchReport, DryRun, Hypervisor, VirshCli};
pub use error::{FAILURE_EXIT_CODE, HotplugError, Result};
pub use event::Event;
pub use filter::Action;
pub use pipeline::{Hotplug, Outcome};
pub use resolver::{MountDescriptor, Resolution};
pub use stage::{SkipReason, Stage};
pub use topology::{CommandTopology, TopologyLister};
