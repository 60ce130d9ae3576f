//! Unattended progression of forced releases.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::platform::DeviceSignals;

use super::policy::InstallPolicy;
use super::state::{Action, State};
use super::updater::Updater;

/// The last action taken, and for which release.
struct Attempt {
    action: &'static str,
    url: String,
    version: String,
    at: Instant,
}

impl Attempt {
    fn repeats(&self, action: &Action, state: &State) -> bool {
        state.ota().is_some_and(|ota| {
            self.action == action.name() && self.url == ota.url && self.version == ota.version
        })
    }
}

/// Moves a forced release forward whenever it reaches a state that waits for a caller.
///
/// Gating conditions are sampled on every transition, never cached. A failed
/// step falls back to the state it started from; repeating the same action for
/// the same release waits `retry` after the previous attempt.
pub struct AutoInstaller {
    updater: Updater,
    policy: InstallPolicy,
    signals: Arc<dyn DeviceSignals>,
    retry: Duration,
    last: Option<Attempt>,
}

impl AutoInstaller {
    pub fn new(
        updater: Updater,
        policy: InstallPolicy,
        signals: Arc<dyn DeviceSignals>,
        retry: Duration,
    ) -> Self {
        Self { updater, policy, signals, retry, last: None }
    }

    /// The action that would move `state` forward, if any.
    pub fn next_action(state: &State) -> Option<Action> {
        match state {
            State::UpdateAvailable { .. } => Some(Action::DownloadUpdate),
            State::ReadyToInstall { .. } => Some(Action::InstallUpdate),
            State::RebootNeeded { .. } => Some(Action::Reboot),
            _ => None,
        }
    }

    /// Decide for one state, performing the follow-up action when allowed.
    pub async fn on_state(&mut self, state: &State) {
        let Some(action) = Self::next_action(state) else {
            return;
        };

        if let Some(last) = self.last.as_ref().filter(|last| last.repeats(&action, state)) {
            let wait = self.retry.saturating_sub(last.at.elapsed());
            if !wait.is_zero() {
                debug!(
                    action = action.name(),
                    wait_secs = wait.as_secs(),
                    "Backing off before retrying"
                );
                sleep(wait).await;
            }
            // Anything may have happened while waiting
            if self.updater.state() != *state {
                return;
            }
        }

        let Some(ota) = state.ota() else { return };
        let conditions = self.signals.conditions().await;
        if !self.policy.should_auto_install(ota, &conditions) {
            debug!(version = %ota.version, state = %state, "Auto-install not allowed now");
            return;
        }

        info!(version = %ota.version, action = action.name(), "Auto-installing update");
        self.last = Some(Attempt {
            action: action.name(),
            url: ota.url.clone(),
            version: ota.version.clone(),
            at: Instant::now(),
        });
        self.updater.perform(action).await;
    }

    /// Follow transitions until the updater goes away.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        let mut transitions = self.updater.transitions();
        // A state restored or reached before subscribing still counts
        let current = self.updater.state();
        self.on_state(&current).await;

        loop {
            match transitions.recv().await {
                Ok(state) => self.on_state(&state).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auto-installer lagged behind state changes");
                    let current = self.updater.state();
                    self.on_state(&current).await;
                }
                Err(RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::ab_update::AbUpdateActionHandler;
    use crate::update::handler::ReleaseCheck;
    use crate::update::ota::Ota;
    use crate::update::recovery::RecoveryUpdateActionHandler;
    use crate::update::scheduler::{TaskScheduler, UpdateScheduler};
    use crate::update::state::Event;
    use crate::update::store::{MemoryCachedOtaProvider, MemoryStateStore};
    use crate::update::test_support::*;
    use std::path::PathBuf;

    const RETRY: Duration = Duration::from_secs(15 * 60);

    fn installer(
        forced: Option<bool>,
        signals: FakeSignals,
    ) -> (AutoInstaller, Arc<RecordingHandler>, State) {
        let handler = Arc::new(RecordingHandler::default());
        let updater = Updater::new(handler.clone(), Arc::new(MemoryStateStore::default()));
        let mut ota = test_ota();
        ota.is_forced = forced;
        let state =
            State::ReadyToInstall { ota, path: PathBuf::from("/data/ota_package/update.zip") };
        (
            AutoInstaller::new(updater, InstallPolicy::default(), Arc::new(signals), RETRY),
            handler,
            state,
        )
    }

    fn forced_ota() -> Ota {
        let mut ota = test_ota();
        ota.is_forced = Some(true);
        ota
    }

    fn check(
        release: Option<Ota>,
        cached: Option<Ota>,
        scheduler: Arc<dyn UpdateScheduler>,
    ) -> ReleaseCheck {
        ReleaseCheck::new(
            Arc::new(FakeChecker::with_release(release)),
            Arc::new(MemoryCachedOtaProvider::new(cached)),
            scheduler,
            InstallPolicy::default(),
        )
    }

    fn ab_updater(ota: &Ota, reboot: Arc<FakeReboot>) -> Updater {
        let handler = AbUpdateActionHandler::new(
            Arc::new(FakeEngine::default()),
            reboot,
            Arc::new(FakeVersion::new(OLD_SOFTWARE_VERSION)),
            check(None, Some(ota.clone()), Arc::new(RecordingScheduler::default())),
        );
        Updater::with_state(
            Arc::new(handler),
            Arc::new(MemoryStateStore::default()),
            State::RebootNeeded { ota: ota.clone() },
        )
    }

    fn recovery_updater(
        downloader: Arc<FakeDownloader>,
        check: ReleaseCheck,
        initial: State,
    ) -> Updater {
        let handler = RecoveryUpdateActionHandler::new(
            Arc::new(FakeRecovery::default()),
            downloader,
            Arc::new(FakeVersion::new(OLD_SOFTWARE_VERSION)),
            check,
        );
        Updater::with_state(Arc::new(handler), Arc::new(MemoryStateStore::default()), initial)
    }

    fn spawn_installer(updater: &Updater, signals: FakeSignals) {
        let installer =
            AutoInstaller::new(updater.clone(), InstallPolicy::default(), Arc::new(signals), RETRY);
        tokio::spawn(installer.run());
    }

    #[test]
    fn test_next_action() {
        let ota = test_ota();
        assert_eq!(
            AutoInstaller::next_action(&State::UpdateAvailable {
                ota: ota.clone(),
                show_notification: false,
                background: true,
            }),
            Some(Action::DownloadUpdate)
        );
        assert_eq!(
            AutoInstaller::next_action(&State::RebootNeeded { ota: ota.clone() }),
            Some(Action::Reboot)
        );
        assert_eq!(
            AutoInstaller::next_action(&State::UpdateDownloading { ota, progress: 3 }),
            None
        );
        assert_eq!(AutoInstaller::next_action(&State::Idle), None);
    }

    #[tokio::test]
    async fn test_forced_release_installs_in_window() {
        let (mut installer, handler, state) = installer(Some(true), FakeSignals::window_open());
        installer.on_state(&state).await;
        assert_eq!(handler.actions(), vec![Action::InstallUpdate]);
    }

    #[tokio::test]
    async fn test_forced_release_waits_outside_window() {
        let (mut installer, handler, state) = installer(Some(true), FakeSignals::window_closed());
        installer.on_state(&state).await;
        assert!(handler.actions().is_empty());
    }

    #[tokio::test]
    async fn test_optional_release_needs_a_caller() {
        let (mut installer, handler, state) = installer(Some(false), FakeSignals::window_open());
        installer.on_state(&state).await;
        assert!(handler.actions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acts_on_restored_state() {
        let ota = forced_ota();
        let reboot = Arc::new(FakeReboot::default());
        let updater = ab_updater(&ota, reboot.clone());

        spawn_installer(&updater, FakeSignals::window_open());
        sleep(Duration::from_secs(1)).await;

        assert_eq!(*reboot.count.lock().unwrap(), 1);
        assert!(matches!(updater.state(), State::RebootedForInstallation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_state_outside_window_is_left_alone() {
        let ota = forced_ota();
        let reboot = Arc::new(FakeReboot::default());
        let updater = ab_updater(&ota, reboot.clone());

        spawn_installer(&updater, FakeSignals::window_closed());
        sleep(Duration::from_secs(1)).await;

        assert_eq!(*reboot.count.lock().unwrap(), 0);
        assert_eq!(updater.state(), State::RebootNeeded { ota });
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reboot_is_retried_after_backoff() {
        let ota = forced_ota();
        let reboot = Arc::new(FakeReboot::default());
        *reboot.fail.lock().unwrap() = true;
        let updater = ab_updater(&ota, reboot.clone());

        spawn_installer(&updater, FakeSignals::window_open());
        sleep(Duration::from_secs(1)).await;
        assert_eq!(*reboot.count.lock().unwrap(), 1);
        assert_eq!(updater.state(), State::RebootNeeded { ota: ota.clone() });

        sleep(RETRY).await;
        assert_eq!(*reboot.count.lock().unwrap(), 2);
        assert_eq!(updater.state(), State::RebootNeeded { ota });
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_download_is_retried_after_backoff() {
        let ota = forced_ota();
        let downloader = Arc::new(FakeDownloader::default());
        *downloader.fail.lock().unwrap() = true;
        let updater = recovery_updater(
            downloader,
            check(None, None, Arc::new(RecordingScheduler::default())),
            State::UpdateAvailable { ota, show_notification: false, background: true },
        );
        let recorder = StateRecorder::new(&updater);

        spawn_installer(&updater, FakeSignals::window_open());
        sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.drain_events(), vec![Event::DownloadFailed]);

        sleep(RETRY / 2).await;
        assert!(recorder.drain_events().is_empty());

        sleep(RETRY / 2).await;
        assert_eq!(recorder.drain_events(), vec![Event::DownloadFailed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_release_downloads_once() {
        let ota = forced_ota();
        let downloader = Arc::new(FakeDownloader::default());
        let scheduler = Arc::new(TaskScheduler::new(
            InstallPolicy::default(),
            Arc::new(FakeSignals::window_open()),
            Duration::from_secs(600),
            RETRY,
        ));
        let updater = recovery_updater(
            downloader.clone(),
            check(Some(ota.clone()), None, scheduler),
            State::Idle,
        );

        spawn_installer(&updater, FakeSignals::window_open());
        sleep(Duration::from_millis(1)).await;
        updater.perform(Action::CheckForUpdate { background: true }).await;

        // Past the scheduled download as well
        sleep(Duration::from_secs(660)).await;

        assert_eq!(downloader.started.lock().unwrap().len(), 1);
        assert_eq!(updater.state(), State::UpdateDownloading { ota, progress: 0 });
    }
}
