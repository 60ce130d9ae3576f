//! Configuration management for the update agent.
//!
//! Loaded from `/etc/otalink/agent.yaml` by default. Every section is
//! optional; CLI arguments override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Args;
use crate::update::{InstallPolicy, MaintenanceWindow};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/otalink/agent.yaml";

/// How this device applies updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    /// Seamless A/B slots driven by the platform update engine
    #[default]
    Ab,
    /// Download, verify, then reboot into recovery
    Recovery,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mechanism: Mechanism,
    /// Release service
    pub server: ServerConfig,
    /// Files owned by the agent
    pub paths: PathsConfig,
    /// Auto-install gating
    pub policy: PolicyConfig,
    /// Periodic and deferred work
    pub schedule: ScheduleConfig,
    /// Device integration
    pub device: DeviceConfig,
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty file is valid and means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(mechanism) = args.mechanism {
            self.mechanism = mechanism;
        }

        if let Some(ref url) = args.server_url {
            self.server.url = url.clone();
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.url.trim().is_empty() {
            return Err("Release server URL cannot be empty".to_string());
        }

        for (name, value) in [
            ("server.timeout", &self.server.timeout),
            ("policy.min_plugged_in", &self.policy.min_plugged_in),
            ("schedule.check_interval", &self.schedule.check_interval),
            ("schedule.install_retry_interval", &self.schedule.install_retry_interval),
            ("schedule.download_delay", &self.schedule.download_delay),
            ("schedule.battery_poll_interval", &self.schedule.battery_poll_interval),
        ] {
            if parse_duration(value).is_none() {
                return Err(format!(
                    "Invalid {} '{}'. Use format like '30s', '5m', '1h', '1d'",
                    name, value
                ));
            }
        }

        for (name, value) in [
            ("schedule.check_interval", &self.schedule.check_interval),
            ("schedule.install_retry_interval", &self.schedule.install_retry_interval),
            ("schedule.battery_poll_interval", &self.schedule.battery_poll_interval),
        ] {
            if parse_duration(value) == Some(Duration::ZERO) {
                return Err(format!("{} must be greater than zero", name));
            }
        }

        MaintenanceWindow::parse(&self.policy.window_start, &self.policy.window_end)?;

        if self.device.reboot_command.is_empty() {
            return Err("device.reboot_command cannot be empty".to_string());
        }

        Ok(())
    }

    /// Gating policy described by the `policy` section.
    pub fn install_policy(&self) -> Result<InstallPolicy, String> {
        let window = MaintenanceWindow::parse(&self.policy.window_start, &self.policy.window_end)?;
        let min_plugged_in = parse_duration(&self.policy.min_plugged_in)
            .ok_or_else(|| {
                format!("Invalid policy.min_plugged_in '{}'", self.policy.min_plugged_in)
            })?;

        Ok(InstallPolicy {
            default_auto_install: self.policy.default_auto_install,
            window,
            min_plugged_in,
        })
    }
}

/// Release service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the release service
    pub url: String,
    /// Project key sent with every request
    pub project_key: Option<String>,
    /// Device serial (read from `ro.serialno` if not set)
    pub device_serial: Option<String>,
    /// Hardware version reported to the release service
    pub hardware_version: String,
    /// Software type reported to the release service
    pub software_type: String,
    /// Request timeout (e.g., "30s")
    pub timeout: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "https://ota.otalink.io".to_string(),
            project_key: None,
            device_serial: None,
            hardware_version: "default".to_string(),
            software_type: "android-build".to_string(),
            timeout: "30s".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn timeout_duration(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(30))
    }
}

/// Files owned by the agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Persisted update state
    pub state_file: PathBuf,
    /// Most recently seen release
    pub ota_cache_file: PathBuf,
    /// Target of recovery package downloads
    pub download_file: PathBuf,
    /// Instant the device was first seen charging
    pub battery_state_file: PathBuf,
    /// Recovery command file read by the recovery environment
    pub recovery_command_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/data/otalink/state.json"),
            ota_cache_file: PathBuf::from("/data/otalink/ota.json"),
            download_file: PathBuf::from("/data/otalink/update.zip"),
            battery_state_file: PathBuf::from("/data/otalink/plugged_in_since"),
            recovery_command_file: PathBuf::from("/cache/recovery/command"),
        }
    }
}

/// Auto-install policy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Install releases that do not say whether they are forced
    pub default_auto_install: bool,
    /// Maintenance window start (HH:MM, local time)
    pub window_start: String,
    /// Maintenance window end (HH:MM, local time, inclusive)
    pub window_end: String,
    /// Minimum time on external power (e.g., "1h")
    pub min_plugged_in: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_auto_install: false,
            window_start: "03:00".to_string(),
            window_end: "05:00".to_string(),
            min_plugged_in: "1h".to_string(),
        }
    }
}

/// Periodic and deferred work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Interval between background update checks
    pub check_interval: String,
    /// Interval between install attempts of a staged update
    pub install_retry_interval: String,
    /// Delay before a forced release is downloaded
    pub download_delay: String,
    /// Interval between battery samples
    pub battery_poll_interval: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval: "12h".to_string(),
            install_retry_interval: "15m".to_string(),
            download_delay: "0s".to_string(),
            battery_poll_interval: "5m".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn check_interval_duration(&self) -> Duration {
        parse_duration(&self.check_interval).unwrap_or(Duration::from_secs(12 * 3600))
    }

    pub fn install_retry_duration(&self) -> Duration {
        parse_duration(&self.install_retry_interval).unwrap_or(Duration::from_secs(15 * 60))
    }

    pub fn download_delay_duration(&self) -> Duration {
        parse_duration(&self.download_delay).unwrap_or(Duration::ZERO)
    }

    pub fn battery_poll_duration(&self) -> Duration {
        parse_duration(&self.battery_poll_interval).unwrap_or(Duration::from_secs(5 * 60))
    }
}

/// Device integration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// System property holding the running software version
    pub version_property: String,
    /// Files tried in order when the property is unavailable
    pub version_files: Vec<PathBuf>,
    /// System property holding the build timestamp (UTC seconds)
    pub build_time_property: String,
    /// Command rebooting the device
    pub reboot_command: Vec<String>,
    /// Command rebooting into recovery
    pub recovery_reboot_command: Vec<String>,
    /// Path of the `update_engine_client` binary
    pub update_engine_client: String,
    /// sysfs power supply class directory
    pub power_supply_dir: PathBuf,
    /// Assumed setup state when it cannot be read (non-Android devices)
    pub setup_complete_fallback: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version_property: "ro.build.version.incremental".to_string(),
            version_files: vec![
                PathBuf::from("/etc/otalink/version"),
                PathBuf::from("/etc/version"),
            ],
            build_time_property: "ro.build.date.utc".to_string(),
            reboot_command: vec!["reboot".to_string()],
            recovery_reboot_command: vec!["reboot".to_string(), "recovery".to_string()],
            update_engine_client: "update_engine_client".to_string(),
            power_supply_dir: PathBuf::from("/sys/class/power_supply"),
            setup_complete_fallback: true,
        }
    }
}

/// Parse a duration string like "30s", "5m", "1h", "1d"
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || !s.is_char_boundary(s.len() - 1) {
        return None;
    }

    let (num, unit) = s.split_at(s.len() - 1);
    let num: u64 = num.parse().ok()?;

    let seconds = match unit {
        "s" => num,
        "m" => num.checked_mul(60)?,
        "h" => num.checked_mul(3600)?,
        "d" => num.checked_mul(86400)?,
        _ => return None,
    };

    Some(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("0s"), Some(Duration::ZERO));
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("10µ"), None);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mechanism, Mechanism::Ab);
        assert_eq!(config.install_policy().unwrap(), InstallPolicy::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AgentConfig::default();
        config.server.url = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.schedule.check_interval = "often".to_string();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.schedule.check_interval = "0m".to_string();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.policy.window_end = "25:00".to_string();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.device.reboot_command.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "otalink-agent",
            "--mechanism",
            "recovery",
            "--server-url",
            "http://10.0.0.2:8080",
        ]);
        let config = AgentConfig::default().with_cli_overrides(&args);
        assert_eq!(config.mechanism, Mechanism::Recovery);
        assert_eq!(config.server.url, "http://10.0.0.2:8080");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = AgentConfig::from_yaml("\n").unwrap();
        assert_eq!(config.paths.state_file, PathBuf::from("/data/otalink/state.json"));
    }
}
