//! Auto-install gating
//!
//! Pure decisions over a [`DeviceConditions`] snapshot. Callers sample the
//! conditions right before deciding; battery and clock change between checks,
//! so nothing here is cached.

use std::time::Duration;

use chrono::NaiveTime;

use super::ota::Ota;

/// Snapshot of the device signals that gate unattended installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConditions {
    /// The user finished the setup wizard
    pub user_setup_complete: bool,
    /// Battery is charging or full on external power
    pub charging: bool,
    /// How long the device has been continuously plugged in
    pub plugged_in_for: Option<Duration>,
    /// Current local wall-clock time
    pub local_time: NaiveTime,
    /// Build timestamp of the running software (UTC seconds)
    pub build_time_utc: Option<i64>,
}

/// Local-time window during which unattended installs are allowed.
///
/// Both ends are inclusive. A window whose start is after its end wraps
/// around midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl MaintenanceWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse `HH:MM` bounds.
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|_| format!("Invalid time '{}'. Use HH:MM", s))
        };
        Ok(Self::new(parse(start)?, parse(end)?))
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

impl Default for MaintenanceWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(5, 0, 0).unwrap_or_default(),
        }
    }
}

/// Auto-install policy of this build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPolicy {
    /// Fallback for releases that do not say whether they are forced
    pub default_auto_install: bool,
    /// Nightly maintenance window
    pub window: MaintenanceWindow,
    /// The device must have been plugged in for strictly longer than this
    pub min_plugged_in: Duration,
}

impl Default for InstallPolicy {
    fn default() -> Self {
        Self {
            default_auto_install: false,
            window: MaintenanceWindow::default(),
            min_plugged_in: Duration::from_secs(3600),
        }
    }
}

impl InstallPolicy {
    /// Whether the release must be installed without user interaction.
    pub fn is_forced(&self, ota: &Ota) -> bool {
        ota.is_forced.unwrap_or(self.default_auto_install)
    }

    /// Whether a staged A/B update reboots on its own once the device allows it.
    ///
    /// Unlike [`is_forced`](Self::is_forced), an explicit `is_forced: false` does
    /// not override a build that auto-installs by default.
    pub fn reboots_unattended(&self, ota: &Ota) -> bool {
        self.default_auto_install || ota.is_forced == Some(true)
    }

    /// Whether an unattended install may happen right now.
    ///
    /// Requires a completed user setup, and then either a release the running
    /// build is too old for (`minBuildUtc`) or the battery/time window.
    pub fn can_auto_install_now(&self, ota: &Ota, conditions: &DeviceConditions) -> bool {
        if !conditions.user_setup_complete {
            return false;
        }
        self.build_below_minimum(ota, conditions) || self.window_holds(conditions)
    }

    /// Forced releases progress on their own once the device allows it.
    pub fn should_auto_install(&self, ota: &Ota, conditions: &DeviceConditions) -> bool {
        self.is_forced(ota) && self.can_auto_install_now(ota, conditions)
    }

    fn build_below_minimum(&self, ota: &Ota, conditions: &DeviceConditions) -> bool {
        match (ota.min_build_utc(), conditions.build_time_utc) {
            (Some(min), Some(build)) => build < min,
            _ => false,
        }
    }

    fn window_holds(&self, conditions: &DeviceConditions) -> bool {
        let plugged_long_enough = conditions
            .plugged_in_for
            .map(|d| d > self.min_plugged_in)
            .unwrap_or(false);

        conditions.charging && plugged_long_enough && self.window.contains(conditions.local_time)
    }
}
