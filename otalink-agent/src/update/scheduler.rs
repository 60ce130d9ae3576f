//! Deferred update work
//!
//! Handlers never wait for gating conditions inside the serialized section;
//! they hand the release to a scheduler which comes back later through
//! `perform`, like any other caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::platform::DeviceSignals;

use super::ota::Ota;
use super::policy::InstallPolicy;
use super::state::{Action, State};
use super::updater::{Updater, WeakUpdater};

/// Schedules follow-up work for a release.
pub trait UpdateScheduler: Send + Sync {
    /// Download a forced release in the background.
    fn schedule_download(&self, ota: &Ota, updater: WeakUpdater);

    /// Reboot into a staged A/B update once the device allows it.
    fn schedule_install(&self, ota: &Ota, updater: WeakUpdater);
}

/// Runs scheduled work as tokio tasks.
pub struct TaskScheduler {
    policy: InstallPolicy,
    signals: Arc<dyn DeviceSignals>,
    download_delay: Duration,
    install_retry: Duration,
}

impl TaskScheduler {
    pub fn new(
        policy: InstallPolicy,
        signals: Arc<dyn DeviceSignals>,
        download_delay: Duration,
        install_retry: Duration,
    ) -> Self {
        Self { policy, signals, download_delay, install_retry }
    }
}

impl UpdateScheduler for TaskScheduler {
    fn schedule_download(&self, ota: &Ota, updater: WeakUpdater) {
        let delay = self.download_delay;
        info!(
            version = %ota.version,
            delay_secs = delay.as_secs(),
            "Scheduling background download"
        );

        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            updater.perform(Action::DownloadUpdate).await;
        });
    }

    fn schedule_install(&self, ota: &Ota, updater: WeakUpdater) {
        let ota = ota.clone();
        let policy = self.policy.clone();
        let signals = self.signals.clone();
        let retry = self.install_retry;
        info!(version = %ota.version, "Scheduling install");

        tokio::spawn(async move {
            loop {
                let Some(current) = updater.upgrade() else { return };
                if !matches!(current.state(), State::RebootNeeded { .. }) {
                    debug!("No longer waiting for reboot, dropping scheduled install");
                    return;
                }

                let conditions = signals.conditions().await;
                if policy.can_auto_install_now(&ota, &conditions) {
                    current.perform(Action::Reboot).await;
                    return;
                }

                debug!(conditions = ?conditions, retry_secs = retry.as_secs(), "Install deferred");
                drop(current);
                sleep(retry).await;
            }
        });
    }
}

/// Periodic background release check.
pub struct PeriodicCheck {
    updater: Updater,
    every: Duration,
}

impl PeriodicCheck {
    pub fn new(updater: Updater, every: Duration) -> Self {
        Self { updater, every }
    }

    /// Check every `every`, starting one period from now.
    #[instrument(skip(self), fields(every_secs = self.every.as_secs()))]
    pub async fn run(self) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; boot already ran a check
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!("Periodic update check");
            self.updater
                .perform(Action::CheckForUpdate { background: true })
                .await;
        }
    }
}
