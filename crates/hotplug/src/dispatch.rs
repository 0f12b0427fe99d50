//! Hypervisor dispatch
//!
//! Each mount becomes one `attach-device`/`detach-device` call carrying a
//! libvirt `<hostdev>` document on the child's stdin. Calls are independent:
//! a failure is recorded and the remaining mounts are still dispatched.

use crate::config::HypervisorSettings;
use crate::filter::Action;
use crate::resolver::{MountDescriptor, Resolution};
use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Path handed to the CLI in place of a document file
pub const INPUT_CHANNEL: &str = "/dev/stdin";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send device document to '{program}': {source}")]
    Input {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

/// Something that can attach devices to and detach them from a domain
pub trait Hypervisor {
    fn apply(&self, action: Action, domain: &str, document: &str) -> Result<(), DispatchError>;
}

/// libvirt `<hostdev>` document for a USB device address
pub fn device_document(mount: &MountDescriptor) -> String {
    format!(
        r#"<hostdev mode="subsystem" type="usb"><source><address bus="{}" device="{}"/></source></hostdev>"#,
        mount.bus_number, mount.device_number
    )
}

/// `virsh` (or a compatible CLI) invoked once per mount
#[derive(Debug, Clone)]
pub struct VirshCli {
    program: String,
    uri: Option<String>,
    extra_args: Vec<String>,
}

impl VirshCli {
    pub fn new(settings: &HypervisorSettings) -> Self {
        Self {
            program: settings.program.clone(),
            uri: settings.uri.clone(),
            extra_args: settings.extra_args.clone(),
        }
    }

    /// Arguments for one call, without the program name
    pub fn args(&self, action: Action, domain: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(5 + self.extra_args.len());
        if let Some(uri) = &self.uri {
            args.push("--connect".to_string());
            args.push(uri.clone());
        }
        args.push(action.operation().to_string());
        args.push(domain.to_string());
        args.push(INPUT_CHANNEL.to_string());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Hypervisor for VirshCli {
    fn apply(&self, action: Action, domain: &str, document: &str) -> Result<(), DispatchError> {
        let args = self.args(action, domain);
        debug!("running {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping stdin closes the pipe so the CLI sees EOF
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(document.as_bytes()),
            None => Ok(()),
        };

        let status = child.wait().map_err(|source| DispatchError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        written.map_err(|source| DispatchError::Input {
            program: self.program.clone(),
            source,
        })?;

        if !status.success() {
            return Err(DispatchError::Failed {
                program: self.program.clone(),
                status,
            });
        }

        Ok(())
    }
}

/// Prints the calls that would be made instead of running them
#[derive(Debug, Clone)]
pub struct DryRun {
    cli: VirshCli,
}

impl DryRun {
    pub fn new(cli: VirshCli) -> Self {
        Self { cli }
    }
}

impl Hypervisor for DryRun {
    fn apply(&self, action: Action, domain: &str, document: &str) -> Result<(), DispatchError> {
        println!(
            "{} {} <<< '{}'",
            self.cli.program(),
            self.cli.args(action, domain).join(" "),
            document
        );
        Ok(())
    }
}

/// Per-mount results of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub succeeded: Vec<MountDescriptor>,
    pub failed: Vec<MountDescriptor>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Attach or detach every mount of `resolution`, in order
pub fn dispatch<H: Hypervisor + ?Sized>(
    hypervisor: &H,
    action: Action,
    resolution: &Resolution,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for mount in &resolution.mounts {
        let document = device_document(mount);
        match hypervisor.apply(action, &resolution.domain, &document) {
            Ok(()) => {
                info!(
                    "{} {} (bus {} device {}) on {}",
                    action.operation(),
                    mount.device_path,
                    mount.bus_number,
                    mount.device_number,
                    resolution.domain
                );
                report.succeeded.push(mount.clone());
            }
            Err(e) => {
                warn!(
                    "{} {} on {} failed: {}",
                    action.operation(),
                    mount.device_path,
                    resolution.domain,
                    e
                );
                report.failed.push(mount.clone());
            }
        }
    }

    report
}
