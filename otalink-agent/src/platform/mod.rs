//! Platform collaborators of the update core.
//!
//! The update handlers only see the traits below. The concrete drivers talk to
//! the device: `update_engine_client` for A/B updates, the recovery command
//! file for recovery updates, the release service over HTTP, sysfs and
//! `getprop` for the gating signals.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use tokio::process::Command;
use tracing::debug;

use crate::error::{OtaError, Result};
use crate::update::{DeviceConditions, Ota, WeakUpdater};

pub mod checker;
pub mod device;
pub mod downloader;
pub mod recovery;
pub mod update_engine;

#[cfg(test)]
mod test_http;

pub use checker::HttpReleaseChecker;
pub use device::{BatteryMonitor, SystemReboot, SystemSignals, SystemVersion};
pub use downloader::HttpDownloader;
pub use recovery::AndroidRecovery;
pub use update_engine::UpdateEngineClient;

/// Queries the release service for the newest release for this device.
#[async_trait]
pub trait ReleaseChecker: Send + Sync {
    /// `Ok(None)` when the device is up to date.
    async fn latest_release(&self) -> Result<Option<Ota>>;
}

/// Callbacks from the platform A/B update engine.
///
/// Called on the engine's own thread; implementations must not block.
pub trait UpdateEngineCallback: Send + Sync {
    fn on_status_update(&self, status: i32, percent: f32);
    fn on_payload_application_complete(&self, error_code: i32);
}

/// Platform A/B update engine.
#[async_trait]
pub trait UpdateEngine: Send + Sync {
    /// Register the callback receiving status updates.
    fn bind(&self, callback: Arc<dyn UpdateEngineCallback>) -> Result<()>;

    /// Ask the engine to stream and apply the payload.
    async fn apply_payload(
        &self,
        url: &str,
        offset: u64,
        size: u64,
        headers: &[String],
    ) -> Result<()>;
}

/// Recovery-partition installer.
#[async_trait]
pub trait RecoveryInterface: Send + Sync {
    /// Fail if the package at `path` must not be installed as `ota`.
    async fn verify(&self, path: &Path, ota: &Ota) -> Result<()>;

    /// Hand the package to recovery. On success the device reboots.
    async fn install(&self, path: &Path) -> Result<()>;
}

/// Starts a package download outside the updater's serialized section.
///
/// Progress, completion and failure are reported back with
/// `DownloadProgress`, `DownloadCompleted` and `DownloadFailed` actions.
pub trait DownloadStarter: Send + Sync {
    fn start_download(&self, url: &str, updater: WeakUpdater) -> Result<()>;
}

/// One-shot platform reboot.
#[async_trait]
pub trait RebootDevice: Send + Sync {
    async fn reboot(&self) -> Result<()>;
}

/// Version of the software currently running.
#[async_trait]
pub trait SoftwareVersion: Send + Sync {
    async fn current_version(&self) -> String;
}

/// Source of the auto-install gating signals.
#[async_trait]
pub trait DeviceSignals: Send + Sync {
    /// Sample every signal now.
    async fn conditions(&self) -> DeviceConditions;
}

/// Run `argv` to completion and return its trimmed stdout.
pub(crate) async fn run_command(argv: &[String]) -> Result<String> {
    let (program, args) = argv.split_first().ok_or_else(|| OtaError::Command {
        command: String::new(),
        message: "empty command".to_string(),
    })?;
    let command = argv.join(" ");
    debug!(command = %command, "Running command");

    let output = Command::new(program).args(args).output().await.map_err(|e| OtaError::Command {
        command: command.clone(),
        message: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OtaError::Command {
            command,
            message: format!("{}: {}", output.status, stderr.trim()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
