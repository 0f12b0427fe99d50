//! libvirt-usb-hotplug
//!
//! udev RUN hook that attaches USB devices plugged into configured host
//! ports to libvirt domains, and detaches them again on removal.

use anyhow::{Context, Result};
use clap::Parser;
use common::{LogSettings, setup_logging};
use hotplug::config::{HotplugConfig, load_config};
use hotplug::{
    CommandTopology, DryRun, FAILURE_EXIT_CODE, HotplugError, Hotplug, Outcome, VirshCli,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "libvirt-usb-hotplug")]
#[command(
    author,
    version,
    about = "Attach/detach hotplugged USB devices to libvirt domains"
)]
#[command(long_about = "
Runs once per udev event. Reads ACTION, SUBSYSTEM, BUSNUM, DEVNUM, DEVPATH,
ID_MODEL and ID_MODEL_FROM_DATABASE from the environment, looks the device
up in the configuration and calls virsh attach-device/detach-device for the
owning domain.

EXAMPLES:
    # udev rule
    SUBSYSTEM==\"usb\", RUN+=\"/usr/local/bin/libvirt-usb-hotplug\"

    # Validate the configuration
    libvirt-usb-hotplug --check-config

    # Replay an event without touching libvirt
    ACTION=add SUBSYSTEM=usb BUSNUM=3 DEVNUM=7 \\
        DEVPATH=/devices/pci0000:00/0000:00:14.0/usb3/3-11 \\
        libvirt-usb-hotplug --dry-run --debug

CONFIGURATION:
    The hook looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/libvirt-usb-hotplug/config.toml
    3. /etc/libvirt-usb-hotplug/config.toml

EXIT CODES:
    0  event handled or ignored
    2  missing ACTION, bad device path, unusable config or topology lister
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Append log output to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Print hypervisor commands instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Validate the configuration, print a summary and exit
    #[arg(long)]
    check_config: bool,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<HotplugError>()
                .map(HotplugError::exit_code)
                .unwrap_or(FAILURE_EXIT_CODE);
            ExitCode::from(code)
        }
    }
}

fn run(args: Args) -> Result<()> {
    if args.save_config {
        init_logging(&log_settings(&args, None));
        let path = HotplugConfig::default_path();
        HotplugConfig::default()
            .save(&path)
            .context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let loaded = match args.config.as_deref() {
        Some(path) => load_config(path),
        None => HotplugConfig::load(None),
    };

    // Logging comes up before the config error is reported so that the
    // failure itself reaches the log.
    init_logging(&log_settings(&args, loaded.as_ref().ok()));

    let config = loaded.context("Failed to load configuration")?;

    if args.check_config {
        print_summary(&config);
        return Ok(());
    }

    debug!("--- BEGIN ---");

    let lister = CommandTopology::new(&config.topology);
    let cli = VirshCli::new(&config.hypervisor);
    let outcome = if args.dry_run {
        Hotplug::new(&config, &lister, &DryRun::new(cli)).handle_env()?
    } else {
        Hotplug::new(&config, &lister, &cli).handle_env()?
    };

    match outcome {
        Outcome::Skipped(_) => {}
        Outcome::Handled {
            action,
            domain,
            report,
        } => {
            if report.is_complete() {
                info!(
                    "{}: {} device(s) handled for {}",
                    action,
                    report.succeeded.len(),
                    domain
                );
            } else {
                warn!(
                    "{}: {} of {} device(s) failed for {}",
                    action,
                    report.failed.len(),
                    report.failed.len() + report.succeeded.len(),
                    domain
                );
            }
        }
    }

    debug!("--- END ---");
    Ok(())
}

/// Logging settings from the config (if any) with CLI overrides applied
fn log_settings(args: &Args, config: Option<&HotplugConfig>) -> LogSettings {
    let mut settings = config
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    settings.debug |= args.debug;
    if let Some(path) = &args.log_file {
        settings.file = Some(path.clone());
    }
    settings
}

/// Install the subscriber, falling back to stderr if the log file is unusable
fn init_logging(settings: &LogSettings) {
    if let Err(e) = setup_logging(settings) {
        let fallback = LogSettings {
            file: None,
            ..settings.clone()
        };
        if setup_logging(&fallback).is_ok() {
            warn!("{}, logging to stderr", e);
        } else {
            eprintln!("Failed to setup logging: {}", e);
        }
    }
}

fn print_summary(config: &HotplugConfig) {
    println!("Configuration OK: {} domain(s)", config.domains.len());
    for domain in &config.domains {
        println!("\n  [{}]", domain.name);
        for path in &domain.devices {
            println!("      device  {}", path);
        }
        for rule in &domain.conditional {
            println!("      when    {}", rule.when);
            for path in &rule.then {
                println!("        then  {}", path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_config_logs_to_stderr_by_default() {
        let args = Args::parse_from(["libvirt-usb-hotplug", "--save-config"]);
        let settings = log_settings(&args, None);
        assert_eq!(settings, LogSettings::default());
        assert!(settings.file.is_none());
    }

    #[test]
    fn test_cli_overrides_config_logging() {
        let config = HotplugConfig::from_toml(
            r#"
[logging]
debug = false
file = "/var/log/libvirt-usb-hotplug.log"
"#,
        )
        .unwrap();
        let args = Args::parse_from([
            "libvirt-usb-hotplug",
            "--debug",
            "--log-file",
            "/tmp/hotplug.log",
        ]);

        let settings = log_settings(&args, Some(&config));
        assert!(settings.debug);
        assert_eq!(settings.file, Some(PathBuf::from("/tmp/hotplug.log")));
    }

    #[test]
    fn test_config_logging_used_without_overrides() {
        let config = HotplugConfig::from_toml("[logging]\ndebug = true\n").unwrap();
        let args = Args::parse_from(["libvirt-usb-hotplug"]);

        let settings = log_settings(&args, Some(&config));
        assert!(settings.debug);
        assert!(settings.file.is_none());
    }
}
