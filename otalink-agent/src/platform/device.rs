//! Device integration: software version, reboot, and the gating signals.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::error::{OtaError, Result};
use crate::update::DeviceConditions;

use super::{run_command, DeviceSignals, RebootDevice, SoftwareVersion};

/// Read an Android system property. `None` off Android or when unset.
pub async fn getprop(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    match run_command(&["getprop".to_string(), name.to_string()]).await {
        Ok(value) if !value.is_empty() => Some(value),
        Ok(_) => None,
        Err(e) => {
            debug!(property = %name, error = %e, "getprop unavailable");
            None
        }
    }
}

async fn read_trimmed(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).await.ok()?;
    let value = content.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Serial reported to the release service.
pub async fn device_serial(configured: Option<&str>) -> String {
    if let Some(serial) = configured.filter(|s| !s.is_empty()) {
        return serial.to_string();
    }
    if let Some(serial) = getprop("ro.serialno").await {
        return serial;
    }
    read_trimmed(Path::new("/etc/machine-id"))
        .await
        .unwrap_or_else(|| "unknown".to_string())
}

/// Running software version: a system property, then version files.
pub struct SystemVersion {
    property: String,
    files: Vec<PathBuf>,
}

impl SystemVersion {
    pub fn new(property: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self { property: property.into(), files }
    }
}

#[async_trait]
impl SoftwareVersion for SystemVersion {
    async fn current_version(&self) -> String {
        if let Some(version) = getprop(&self.property).await {
            return version;
        }
        for file in &self.files {
            if let Some(version) = read_trimmed(file).await {
                return version;
            }
        }
        warn!(property = %self.property, "Software version unknown");
        "unknown".to_string()
    }
}

/// Reboots with the configured command.
pub struct SystemReboot {
    command: Vec<String>,
}

impl SystemReboot {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl RebootDevice for SystemReboot {
    #[instrument(skip(self))]
    async fn reboot(&self) -> Result<()> {
        info!(command = %self.command.join(" "), "Rebooting device");
        run_command(&self.command)
            .await
            .map_err(|e| OtaError::RebootFailed(e.to_string()))?;
        Ok(())
    }
}

/// Tracks how long the device has been on external power.
///
/// The instant charging was first seen is persisted, so the plugged-in time
/// survives agent restarts.
pub struct BatteryMonitor {
    power_supply_dir: PathBuf,
    state_file: PathBuf,
}

impl BatteryMonitor {
    pub fn new(power_supply_dir: impl Into<PathBuf>, state_file: impl Into<PathBuf>) -> Self {
        Self {
            power_supply_dir: power_supply_dir.into(),
            state_file: state_file.into(),
        }
    }

    /// A battery reports `Charging`/`Full`, or an external supply is online.
    pub async fn is_charging(&self) -> bool {
        let Ok(mut entries) = fs::read_dir(&self.power_supply_dir).await else {
            return false;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let supply = entry.path();
            let kind = read_trimmed(&supply.join("type")).await.unwrap_or_default();
            let powered = if kind == "Battery" {
                let status = read_trimmed(&supply.join("status")).await;
                matches!(status.as_deref(), Some("Charging" | "Full"))
            } else {
                read_trimmed(&supply.join("online")).await.as_deref() == Some("1")
            };
            if powered {
                return true;
            }
        }
        false
    }

    async fn plugged_in_since(&self) -> Option<DateTime<Utc>> {
        let raw = read_trimmed(&self.state_file).await?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(since) => Some(since.with_timezone(&Utc)),
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.state_file.display(),
                    "Ignoring corrupt battery state"
                );
                None
            }
        }
    }

    /// Sample the charger and update the persisted plug-in instant.
    ///
    /// Returns whether the device is charging and for how long.
    pub async fn poll(&self, now: DateTime<Utc>) -> (bool, Option<Duration>) {
        let charging = self.is_charging().await;

        if !charging {
            match fs::remove_file(&self.state_file).await {
                Ok(()) => info!("Device unplugged"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(error = %e, "Failed to clear battery state"),
            }
            return (false, None);
        }

        let since = match self.plugged_in_since().await {
            Some(since) => since,
            None => {
                info!("Device plugged in");
                if let Err(e) = self.persist(now).await {
                    warn!(error = %e, "Failed to persist battery state");
                }
                now
            }
        };

        (true, (now - since).to_std().ok())
    }

    async fn persist(&self, since: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.state_file, since.to_rfc3339()).await?;
        Ok(())
    }

    /// Keep the plug-in instant current between update decisions.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (charging, plugged_in_for) = self.poll(Utc::now()).await;
            debug!(charging, plugged_in_for = ?plugged_in_for, "Battery sampled");
        }
    }
}

/// Samples the gating signals from the running system.
pub struct SystemSignals {
    battery: Arc<BatteryMonitor>,
    build_time_property: String,
    setup_complete_fallback: bool,
}

impl SystemSignals {
    pub fn new(
        battery: Arc<BatteryMonitor>,
        build_time_property: impl Into<String>,
        setup_complete_fallback: bool,
    ) -> Self {
        Self {
            battery,
            build_time_property: build_time_property.into(),
            setup_complete_fallback,
        }
    }

    async fn user_setup_complete(&self) -> bool {
        let argv = ["settings", "get", "secure", "user_setup_complete"].map(String::from);
        match run_command(&argv).await {
            Ok(value) => value == "1",
            Err(_) => self.setup_complete_fallback,
        }
    }
}

#[async_trait]
impl DeviceSignals for SystemSignals {
    async fn conditions(&self) -> DeviceConditions {
        let (charging, plugged_in_for) = self.battery.poll(Utc::now()).await;
        let build_time_utc = getprop(&self.build_time_property)
            .await
            .and_then(|v| v.parse::<i64>().ok());

        DeviceConditions {
            user_setup_complete: self.user_setup_complete().await,
            charging,
            plugged_in_for,
            local_time: Local::now().time(),
            build_time_utc,
        }
    }
}
