//! Integration tests for the event pipeline
//!
//! Tests whole invocations against in-memory collaborators:
//! - Direct port rules
//! - Conditional (hub-triggered) rules with partial topology data
//! - Events that must be ignored
//! - Hard failures

use hotplug::dispatch::DispatchError;
use hotplug::topology::TopologyError;
use hotplug::{
    Action, ConditionalRule, DomainRule, HotplugConfig, HotplugError, Hotplug, Hypervisor,
    MountDescriptor, Outcome, SkipReason, TopologyLister,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

const USB3: &str = "/devices/pci0000:00/0000:00:14.0/usb3";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    operation: &'static str,
    domain: String,
    document: String,
}

#[derive(Default)]
struct RecordingHypervisor {
    calls: RefCell<Vec<Call>>,
    reject_domain: Option<String>,
}

impl Hypervisor for RecordingHypervisor {
    fn apply(&self, action: Action, domain: &str, document: &str) -> Result<(), DispatchError> {
        self.calls.borrow_mut().push(Call {
            operation: action.operation(),
            domain: domain.to_string(),
            document: document.to_string(),
        });
        if self.reject_domain.as_deref() == Some(domain) {
            return Err(DispatchError::Spawn {
                program: "virsh".to_string(),
                source: std::io::Error::other("domain is not running"),
            });
        }
        Ok(())
    }
}

enum Listing {
    Lines(Vec<String>),
    Unavailable,
}

struct FakeTopology {
    listing: Listing,
    calls: Cell<usize>,
}

impl FakeTopology {
    fn with_lines(lines: &[&str]) -> Self {
        Self {
            listing: Listing::Lines(lines.iter().map(|l| l.to_string()).collect()),
            calls: Cell::new(0),
        }
    }

    fn unavailable() -> Self {
        Self {
            listing: Listing::Unavailable,
            calls: Cell::new(0),
        }
    }
}

impl TopologyLister for FakeTopology {
    fn list_topology(&self) -> Result<Vec<String>, TopologyError> {
        self.calls.set(self.calls.get() + 1);
        match &self.listing {
            Listing::Lines(lines) => Ok(lines.clone()),
            Listing::Unavailable => Err(TopologyError::Spawn {
                program: "lsusb".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}

fn config() -> HotplugConfig {
    let mut config = HotplugConfig::default();
    config.udev.sysfs_root = std::env::temp_dir().join("libvirt-usb-hotplug-no-sysfs");
    config.domains = vec![
        DomainRule {
            name: "vm1".to_string(),
            devices: vec![format!("{}/3-11", USB3)],
            conditional: Vec::new(),
        },
        DomainRule {
            name: "vm2".to_string(),
            devices: Vec::new(),
            conditional: vec![ConditionalRule {
                when: format!("{}/3-12", USB3),
                then: vec![format!("{}/3-12/3-12.1", USB3), format!("{}/3-12/3-12.2", USB3)],
            }],
        },
    ];
    config
}

fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
    vars.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn handle(
    config: &HotplugConfig,
    topology: &FakeTopology,
    hypervisor: &RecordingHypervisor,
    vars: &[(&str, &str)],
) -> Result<Outcome, HotplugError> {
    let vars = env(vars);
    Hotplug::new(config, topology, hypervisor).handle_vars(|name| vars.get(name).cloned())
}

fn document(bus: u32, device: u32) -> String {
    format!(
        r#"<hostdev mode="subsystem" type="usb"><source><address bus="{}" device="{}"/></source></hostdev>"#,
        bus, device
    )
}

mod direct_rules {
    use super::*;

    #[test]
    fn test_attach_on_add() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-11", USB3);

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "7"),
                ("DEVPATH", path.as_str()),
            ],
        )
        .unwrap();

        assert_eq!(
            hypervisor.calls.borrow().as_slice(),
            &[Call {
                operation: "attach-device",
                domain: "vm1".to_string(),
                document: document(3, 7),
            }]
        );
        match outcome {
            Outcome::Handled {
                action,
                domain,
                report,
            } => {
                assert_eq!(action, Action::Add);
                assert_eq!(domain, "vm1");
                assert_eq!(
                    report.succeeded,
                    vec![MountDescriptor {
                        device_path: path,
                        bus_number: 3,
                        device_number: 7,
                    }]
                );
            }
            other => panic!("expected Handled, got {:?}", other),
        }
        assert_eq!(topology.calls.get(), 0);
    }

    #[test]
    fn test_descendant_detach_on_remove() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-11/3-11.3", USB3);
        let vars = [
            ("ACTION", "remove"),
            ("SUBSYSTEM", "usb"),
            ("BUSNUM", "003"),
            ("DEVNUM", "012"),
            ("DEVPATH", path.as_str()),
        ];

        handle(&config, &topology, &hypervisor, &vars).unwrap();
        handle(&config, &topology, &hypervisor, &vars).unwrap();

        let calls = hypervisor.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.operation == "detach-device"));
        assert!(calls.iter().all(|c| c.document == document(3, 12)));
        assert_eq!(topology.calls.get(), 0);
    }

    #[test]
    fn test_sibling_port_is_ignored() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-1", USB3);

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "2"),
                ("DEVPATH", path.as_str()),
            ],
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Skipped(SkipReason::NoMatchingRule));
        assert!(hypervisor.calls.borrow().is_empty());
    }

    #[test]
    fn test_failed_attach_is_reported_not_fatal() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor {
            reject_domain: Some("vm1".to_string()),
            ..Default::default()
        };
        let path = format!("{}/3-11", USB3);

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "7"),
                ("DEVPATH", path.as_str()),
            ],
        )
        .unwrap();

        let Outcome::Handled { report, .. } = outcome else {
            panic!("expected Handled");
        };
        assert_eq!(report.failed.len(), 1);
        assert!(report.succeeded.is_empty());
    }
}

mod conditional_rules {
    use super::*;

    #[test]
    fn test_only_found_targets_are_dispatched() {
        let config = config();
        let topology = FakeTopology::with_lines(&[
            "        /sys/bus/usb/devices/3-12  /dev/bus/usb/003/005",
            "            /sys/bus/usb/devices/3-12.1  /dev/bus/usb/003/009",
        ]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-12/3-12.1", USB3);

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "9"),
                ("DEVPATH", path.as_str()),
                ("ID_MODEL", "USB_Optical_Mouse"),
            ],
        )
        .unwrap();

        assert_eq!(
            hypervisor.calls.borrow().as_slice(),
            &[Call {
                operation: "attach-device",
                domain: "vm2".to_string(),
                document: document(3, 9),
            }]
        );
        let Outcome::Handled { report, .. } = outcome else {
            panic!("expected Handled");
        };
        assert!(report.is_complete());
        assert_eq!(topology.calls.get(), 2);
    }

    #[test]
    fn test_targets_dispatched_in_configured_order() {
        let config = config();
        let topology = FakeTopology::with_lines(&[
            "/sys/bus/usb/devices/3-12.2  /dev/bus/usb/003/010",
            "/sys/bus/usb/devices/3-12.1  /dev/bus/usb/003/009",
        ]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-12/3-12.2", USB3);

        handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "remove"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "10"),
                ("DEVPATH", path.as_str()),
            ],
        )
        .unwrap();

        let documents: Vec<_> = hypervisor
            .calls
            .borrow()
            .iter()
            .map(|c| c.document.clone())
            .collect();
        assert_eq!(documents, vec![document(3, 9), document(3, 10)]);
    }

    #[test]
    fn test_hub_event_itself_is_skipped() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-12", USB3);

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "5"),
                ("DEVPATH", path.as_str()),
                ("ID_MODEL_FROM_DATABASE", "Hub"),
            ],
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Skipped(SkipReason::HubDevice("Hub".to_string())));
        assert_eq!(topology.calls.get(), 0);
        assert!(hypervisor.calls.borrow().is_empty());
    }

    #[test]
    fn test_unavailable_lister_fails() {
        let config = config();
        let topology = FakeTopology::unavailable();
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-12/3-12.1", USB3);

        let err = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "9"),
                ("DEVPATH", path.as_str()),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, HotplugError::TopologyUnavailable { .. }));
        assert_eq!(err.exit_code(), 2);
        assert!(hypervisor.calls.borrow().is_empty());
    }
}

mod ignored_events {
    use super::*;

    #[test]
    fn test_non_usb_subsystem() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "pci"),
                ("BUSNUM", "0"),
                ("DEVNUM", "1"),
                ("DEVPATH", "/devices/pci0000:00/0000:00:14.0"),
            ],
        )
        .unwrap();

        assert_eq!(
            outcome,
            Outcome::Skipped(SkipReason::WrongSubsystem("pci".to_string()))
        );
        assert!(hypervisor.calls.borrow().is_empty());
    }

    #[test]
    fn test_unsupported_action() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-11", USB3);

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "change"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "7"),
                ("DEVPATH", path.as_str()),
            ],
        )
        .unwrap();

        assert_eq!(
            outcome,
            Outcome::Skipped(SkipReason::UnsupportedAction("change".to_string()))
        );
        assert!(hypervisor.calls.borrow().is_empty());
    }

    #[test]
    fn test_missing_devpath() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "7"),
            ],
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Skipped(SkipReason::MissingField("DEVPATH")));
    }

    #[test]
    fn test_interface_event_under_trigger_port() {
        let config = config();
        let topology = FakeTopology::with_lines(&[
            "/sys/bus/usb/devices/3-12.1  /dev/bus/usb/003/009",
            "/sys/bus/usb/devices/3-12.2  /dev/bus/usb/003/010",
        ]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-12/3-12.1/3-12.1:1.0", USB3);

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "usb"),
                ("DEVPATH", path.as_str()),
            ],
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Skipped(SkipReason::MissingField("BUSNUM")));
        assert_eq!(topology.calls.get(), 0);
        assert!(hypervisor.calls.borrow().is_empty());
    }

    #[test]
    fn test_interface_event_under_direct_port() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-11/3-11:1.0", USB3);

        let outcome = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "remove"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVPATH", path.as_str()),
            ],
        )
        .unwrap();

        assert_eq!(outcome, Outcome::Skipped(SkipReason::MissingField("DEVNUM")));
        assert!(hypervisor.calls.borrow().is_empty());
    }
}

mod failures {
    use super::*;

    #[test]
    fn test_missing_action() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();
        let path = format!("{}/3-11", USB3);

        let err = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "7"),
                ("DEVPATH", path.as_str()),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, HotplugError::MissingAction));
        assert_eq!(err.exit_code(), 2);
        assert!(hypervisor.calls.borrow().is_empty());
    }

    #[test]
    fn test_relative_devpath() {
        let config = config();
        let topology = FakeTopology::with_lines(&[]);
        let hypervisor = RecordingHypervisor::default();

        let err = handle(
            &config,
            &topology,
            &hypervisor,
            &[
                ("ACTION", "add"),
                ("SUBSYSTEM", "usb"),
                ("BUSNUM", "3"),
                ("DEVNUM", "7"),
                ("DEVPATH", "devices/usb3/3-11"),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, HotplugError::InvalidDevicePath { .. }));
    }
}
