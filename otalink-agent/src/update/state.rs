//! Update lifecycle data model
//!
//! `State` is the single source of truth for what the device is doing,
//! `Action` is what a caller wants to happen, and `Event` is a one-shot
//! notification for observers that is not part of the state.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ota::Ota;

/// Current state of the update lifecycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum State {
    /// No update activity
    #[default]
    Idle,

    /// A release check is in flight
    CheckingForUpdates,

    /// Release metadata fetched, nothing downloaded yet
    UpdateAvailable {
        ota: Ota,
        show_notification: bool,
        background: bool,
    },

    /// Package download (recovery) or payload application (A/B) in progress
    UpdateDownloading { ota: Ota, progress: u8 },

    /// A/B only: post-download verification and slot finalization
    Finalizing { ota: Ota, progress: u8 },

    /// Recovery only: package downloaded and verified
    ReadyToInstall { ota: Ota, path: PathBuf },

    /// A/B only: the inactive slot is staged, a reboot activates it
    RebootNeeded { ota: Ota },

    /// A reboot into the new software was requested
    RebootedForInstallation {
        ota: Ota,
        /// Version that was running when the reboot was requested
        updating_from_version: String,
    },
}

impl State {
    /// Whether a `CheckForUpdate` action may proceed in this state.
    pub fn allows_update_check(&self) -> bool {
        matches!(self, State::Idle)
    }

    /// Release the state refers to, if any.
    pub fn ota(&self) -> Option<&Ota> {
        match self {
            State::Idle | State::CheckingForUpdates => None,
            State::UpdateAvailable { ota, .. }
            | State::UpdateDownloading { ota, .. }
            | State::Finalizing { ota, .. }
            | State::ReadyToInstall { ota, .. }
            | State::RebootNeeded { ota }
            | State::RebootedForInstallation { ota, .. } => Some(ota),
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::CheckingForUpdates => "checking_for_updates",
            State::UpdateAvailable { .. } => "update_available",
            State::UpdateDownloading { .. } => "update_downloading",
            State::Finalizing { .. } => "finalizing",
            State::ReadyToInstall { .. } => "ready_to_install",
            State::RebootNeeded { .. } => "reboot_needed",
            State::RebootedForInstallation { .. } => "rebooted_for_installation",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::UpdateDownloading { progress, .. } | State::Finalizing { progress, .. } => {
                write!(f, "{} ({}%)", self.name(), progress)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Caller intent submitted to the updater
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Query the release service. `background` is false for user-initiated checks.
    CheckForUpdate { background: bool },

    /// Start fetching the available release
    DownloadUpdate,

    /// Recovery only: download progress in percent
    DownloadProgress(u8),

    /// Recovery only: the package was written to this path
    DownloadCompleted(PathBuf),

    /// The download could not be completed
    DownloadFailed,

    /// Recovery only: install the verified package
    InstallUpdate,

    /// A/B only: reboot into the staged slot
    Reboot,
}

impl Action {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::CheckForUpdate { .. } => "check_for_update",
            Action::DownloadUpdate => "download_update",
            Action::DownloadProgress(_) => "download_progress",
            Action::DownloadCompleted(_) => "download_completed",
            Action::DownloadFailed => "download_failed",
            Action::InstallUpdate => "install_update",
            Action::Reboot => "reboot",
        }
    }
}

/// Fire-and-forget notification for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    NoUpdatesAvailable,
    DownloadFailed,
    VerificationFailed,
    RebootToUpdateSucceeded,
    RebootToUpdateFailed,
}

/// Clamp a percentage into the 0..=100 range used by progress states.
pub fn clamp_progress(percent: i64) -> u8 {
    percent.clamp(0, 100) as u8
}
