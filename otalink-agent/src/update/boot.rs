//! Boot-time reconciliation
//!
//! After a reboot requested for an installation, the version that was running
//! before is compared with the running one to tell whether the update took.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::platform::{DeviceSignals, SoftwareVersion};

use super::state::{Action, Event, State};
use super::updater::Updater;

pub struct BootCompletion {
    updater: Updater,
    version: Arc<dyn SoftwareVersion>,
    signals: Arc<dyn DeviceSignals>,
    leftover_package: Option<PathBuf>,
}

impl BootCompletion {
    pub fn new(
        updater: Updater,
        version: Arc<dyn SoftwareVersion>,
        signals: Arc<dyn DeviceSignals>,
        leftover_package: Option<PathBuf>,
    ) -> Self {
        Self { updater, version, signals, leftover_package }
    }

    /// Report the outcome of a pending installation, reset to idle and check for updates.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Option<Event> {
        self.remove_leftover_package().await;

        let running = self.version.current_version().await;
        let outcome = self
            .updater
            .exclusive(|ctx, state| {
                let outcome = match state {
                    State::RebootedForInstallation { ota, updating_from_version } => {
                        let event = if *updating_from_version != running {
                            Event::RebootToUpdateSucceeded
                        } else {
                            Event::RebootToUpdateFailed
                        };
                        info!(
                            from = %updating_from_version,
                            running = %running,
                            target = %ota.version,
                            outcome = ?event,
                            "Rebooted for installation"
                        );
                        ctx.trigger_event(event);
                        Some(event)
                    }
                    _ => None,
                };
                ctx.set_state(State::Idle);
                outcome
            })
            .await;

        if self.signals.conditions().await.user_setup_complete {
            info!("Checking for update on boot");
            self.updater
                .perform(Action::CheckForUpdate { background: true })
                .await;
        } else {
            info!("User setup not complete, skipping boot update check");
        }

        outcome
    }

    async fn remove_leftover_package(&self) {
        let Some(path) = &self.leftover_package else { return };
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!(path = %path.display(), "Removed previous update package"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove previous update package"
            ),
        }
    }
}
