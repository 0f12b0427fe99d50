//! Hook configuration management
//!
//! The configuration maps libvirt domains to the USB ports they own. Domains
//! are tried in file order, so the order of `[[domain]]` tables matters.

use anyhow::{Context, Result, anyhow};
use common::LogSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const SYSTEM_CONFIG_PATH: &str = "/etc/libvirt-usb-hotplug/config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotplugConfig {
    #[serde(default)]
    pub logging: LogSettings,
    #[serde(default)]
    pub udev: UdevSettings,
    #[serde(default)]
    pub topology: TopologySettings,
    #[serde(default)]
    pub hypervisor: HypervisorSettings,
    /// Per-domain device rules, in match order
    #[serde(default, rename = "domain")]
    pub domains: Vec<DomainRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdevSettings {
    /// Mount point of sysfs; `DEVPATH` is relative to it
    #[serde(default = "UdevSettings::default_sysfs_root")]
    pub sysfs_root: PathBuf,
}

impl Default for UdevSettings {
    fn default() -> Self {
        Self {
            sysfs_root: Self::default_sysfs_root(),
        }
    }
}

impl UdevSettings {
    fn default_sysfs_root() -> PathBuf {
        PathBuf::from("/sys")
    }
}

/// External tool used to look up device numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySettings {
    #[serde(default = "TopologySettings::default_program")]
    pub program: String,
    #[serde(default = "TopologySettings::default_args")]
    pub args: Vec<String>,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            program: Self::default_program(),
            args: Self::default_args(),
        }
    }
}

impl TopologySettings {
    fn default_program() -> String {
        "lsusb".to_string()
    }

    fn default_args() -> Vec<String> {
        // -tvv prints "/sys/bus/usb/devices/<port>  /dev/bus/usb/<bus>/<dev>" per device
        vec!["-t".to_string(), "-v".to_string(), "-v".to_string()]
    }
}

/// Hypervisor management CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypervisorSettings {
    #[serde(default = "HypervisorSettings::default_program")]
    pub program: String,
    /// libvirt connection URI, passed as `--connect`
    #[serde(default)]
    pub uri: Option<String>,
    /// Extra arguments appended to every attach/detach call (e.g. `--live`)
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for HypervisorSettings {
    fn default() -> Self {
        Self {
            program: Self::default_program(),
            uri: None,
            extra_args: Vec::new(),
        }
    }
}

impl HypervisorSettings {
    fn default_program() -> String {
        "virsh".to_string()
    }
}

/// Devices owned by one libvirt domain
///
/// # Example Configuration
/// ```toml
/// [[domain]]
/// name = "vm1"
/// devices = ["/devices/pci0000:00/0000:00:14.0/usb3/3-11"]
///
/// [[domain.conditional]]
/// when = "/devices/pci0000:00/0000:00:14.0/usb3/3-12"
/// then = [
///     "/devices/pci0000:00/0000:00:14.0/usb3/3-12/3-12.1",
///     "/devices/pci0000:00/0000:00:14.0/usb3/3-12/3-12.2",
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    /// libvirt domain name
    pub name: String,
    /// Ports whose devices (and anything below them) belong to this domain
    #[serde(default)]
    pub devices: Vec<String>,
    /// Rules that mount a fixed device set when a trigger port sees an event
    #[serde(default)]
    pub conditional: Vec<ConditionalRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalRule {
    /// Trigger port, typically a hub
    pub when: String,
    /// Devices to attach/detach when the trigger fires, in dispatch order
    pub then: Vec<String>,
}

impl HotplugConfig {
    /// Load configuration from the specified path, or the first standard
    /// location that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            Self::candidate_paths()
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: HotplugConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        PathBuf::from(SYSTEM_CONFIG_PATH)
    }

    /// Locations searched when no path is given, in order
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("libvirt-usb-hotplug").join("config.toml"));
        }
        candidates.push(Self::default_path());
        candidates
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.topology.program.trim().is_empty() {
            return Err(anyhow!("topology.program must not be empty"));
        }
        if self.hypervisor.program.trim().is_empty() {
            return Err(anyhow!("hypervisor.program must not be empty"));
        }

        let mut seen = HashSet::new();
        for domain in &self.domains {
            if domain.name.trim().is_empty() {
                return Err(anyhow!("Empty domain name in [[domain]] table"));
            }
            if !seen.insert(domain.name.as_str()) {
                return Err(anyhow!("Duplicate domain '{}'", domain.name));
            }

            for path in &domain.devices {
                Self::validate_device_path(&domain.name, path)?;
            }

            for rule in &domain.conditional {
                Self::validate_device_path(&domain.name, &rule.when)?;
                if rule.then.is_empty() {
                    return Err(anyhow!(
                        "Conditional rule for '{}' in domain '{}' has no devices to mount",
                        rule.when,
                        domain.name
                    ));
                }
                for path in &rule.then {
                    Self::validate_device_path(&domain.name, path)?;
                }
            }
        }

        Ok(())
    }

    /// Validate a configured sysfs device path
    fn validate_device_path(domain: &str, path: &str) -> Result<()> {
        if !path.starts_with('/') {
            return Err(anyhow!(
                "Invalid device path '{}' in domain '{}', must be absolute (e.g., '/devices/pci0000:00/0000:00:14.0/usb3/3-11')",
                path,
                domain
            ));
        }
        if path.len() > 1 && path.ends_with('/') {
            return Err(anyhow!(
                "Invalid device path '{}' in domain '{}', must not end with '/'",
                path,
                domain
            ));
        }
        Ok(())
    }
}

/// Load a config from a user-supplied path string, expanding `~`
pub fn load_config(path: &str) -> Result<HotplugConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    HotplugConfig::load(Some(path_buf))
}
