//! A/B (seamless) update strategy
//!
//! The platform update engine streams the payload into the inactive slot and
//! reports progress through callbacks on its own thread. Callbacks are pushed
//! into a channel and replayed through [`Updater::deliver`], so they are
//! serialized with caller actions.
//!
//! Flow:
//! 1. `Idle + CheckForUpdate` queries the release service
//! 2. `UpdateAvailable + DownloadUpdate` asks the engine to apply the payload
//! 3. Engine status drives `UpdateDownloading` → `Finalizing` → `RebootNeeded`
//! 4. `RebootNeeded + Reboot` records the running version and reboots

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::platform::{RebootDevice, SoftwareVersion, UpdateEngine, UpdateEngineCallback};

use super::handler::{Handling, PlatformEvent, ReleaseCheck, UpdateActionHandler};
use super::ota::Ota;
use super::scheduler::UpdateScheduler;
use super::state::{clamp_progress, Action, Event, State};
use super::store::CachedOtaProvider;
use super::updater::{Updater, UpdaterContext, WeakUpdater};

/// Update engine status codes. These must match the platform values.
pub mod status {
    pub const IDLE: i32 = 0;
    pub const CHECKING_FOR_UPDATE: i32 = 1;
    pub const UPDATE_AVAILABLE: i32 = 2;
    pub const DOWNLOADING: i32 = 3;
    pub const VERIFYING: i32 = 4;
    pub const FINALIZING: i32 = 5;
    pub const UPDATED_NEED_REBOOT: i32 = 6;
    pub const REPORTING_ERROR_EVENT: i32 = 7;
    pub const ATTEMPTING_ROLLBACK: i32 = 8;
    pub const DISABLED: i32 = 9;
}

/// Update engine completion codes relevant here. Every other code is a verification error.
pub mod error_code {
    pub const SUCCESS: i32 = 0;
    pub const DOWNLOAD_TRANSFER_ERROR: i32 = 9;
}

/// Forwards engine callbacks from the engine thread into the updater's queue.
struct CallbackBridge {
    tx: mpsc::UnboundedSender<PlatformEvent>,
}

impl UpdateEngineCallback for CallbackBridge {
    fn on_status_update(&self, status: i32, percent: f32) {
        debug!(status, percent, "onStatusUpdate");
        if self.tx.send(PlatformEvent::EngineStatus { status, percent }).is_err() {
            debug!("Updater gone, dropping engine status");
        }
    }

    fn on_payload_application_complete(&self, error_code: i32) {
        debug!(error_code, "onPayloadApplicationComplete");
        if self.tx.send(PlatformEvent::PayloadApplicationComplete { error_code }).is_err() {
            debug!("Updater gone, dropping payload completion");
        }
    }
}

/// A/B update handler.
pub struct AbUpdateActionHandler {
    engine: Arc<dyn UpdateEngine>,
    reboot: Arc<dyn RebootDevice>,
    version: Arc<dyn SoftwareVersion>,
    check: ReleaseCheck,
    /// A payload was handed to the engine and it has not settled yet
    applying: AtomicBool,
}

impl AbUpdateActionHandler {
    pub fn new(
        engine: Arc<dyn UpdateEngine>,
        reboot: Arc<dyn RebootDevice>,
        version: Arc<dyn SoftwareVersion>,
        check: ReleaseCheck,
    ) -> Self {
        Self {
            engine,
            reboot,
            version,
            check,
            applying: AtomicBool::new(false),
        }
    }

    #[instrument(skip(self, ctx, ota), fields(version = %ota.version))]
    async fn download(&self, ctx: &UpdaterContext<'_>, ota: &Ota) -> Handling {
        if self.applying.load(Ordering::SeqCst) {
            return Handling::NotAllowed;
        }

        let headers = ota.metadata_pairs();
        let (offset, size) = (ota.payload_offset(), ota.payload_size());
        info!(url = %ota.url, offset, size, "Applying payload");

        match self.engine.apply_payload(&ota.url, offset, size, &headers).await {
            // The engine reports DOWNLOADING through its callback
            Ok(()) => self.applying.store(true, Ordering::SeqCst),
            Err(e) => {
                error!(error = %e, "Update engine refused the payload");
                ctx.trigger_event(Event::DownloadFailed);
            }
        }
        Handling::Applied
    }

    #[instrument(skip(self, ctx, ota), fields(version = %ota.version))]
    async fn reboot(&self, ctx: &UpdaterContext<'_>, ota: &Ota) -> Handling {
        // Recorded before rebooting: boot logic compares it with the version that comes up
        let updating_from_version = self.version.current_version().await;
        ctx.set_state(State::RebootedForInstallation {
            ota: ota.clone(),
            updating_from_version,
        });

        if let Err(e) = self.reboot.reboot().await {
            error!(error = %e, "Reboot failed, update stays staged");
            ctx.set_state(State::RebootNeeded { ota: ota.clone() });
        }
        Handling::Applied
    }

    fn on_status(&self, ctx: &UpdaterContext<'_>, status: i32, percent: f32) {
        let progress = clamp_progress((f64::from(percent) * 100.0) as i64);
        let cached = || self.check.cache().get();

        match status {
            status::DOWNLOADING => match cached() {
                Some(ota) => ctx.set_state(State::UpdateDownloading { ota, progress }),
                None => ctx.set_state(State::Idle),
            },
            status::FINALIZING => match cached() {
                Some(ota) => ctx.set_state(State::Finalizing { ota, progress }),
                None => ctx.set_state(State::Idle),
            },
            // Errors arrive through the completion callback
            status::IDLE | status::REPORTING_ERROR_EVENT => {
                self.applying.store(false, Ordering::SeqCst);
                ctx.set_state(State::Idle);
            }
            status::UPDATED_NEED_REBOOT => {
                self.applying.store(false, Ordering::SeqCst);
                match cached() {
                    Some(ota) => {
                        ctx.set_state(State::RebootNeeded { ota: ota.clone() });
                        if self.check.policy().reboots_unattended(&ota) {
                            self.check.scheduler().schedule_install(&ota, ctx.updater());
                        }
                    }
                    None => ctx.set_state(State::Idle),
                }
            }
            status::CHECKING_FOR_UPDATE | status::UPDATE_AVAILABLE | status::VERIFYING => {
                debug!(status, "Engine status not used by streaming updates");
            }
            status::ATTEMPTING_ROLLBACK => info!(percent, "Update engine attempting rollback"),
            status::DISABLED => info!("Update engine disabled"),
            other => warn!(status = other, "Unknown update engine status"),
        }
    }

    fn on_complete(&self, ctx: &UpdaterContext<'_>, code: i32) {
        self.applying.store(false, Ordering::SeqCst);
        match code {
            error_code::SUCCESS => info!("Payload applied"),
            error_code::DOWNLOAD_TRANSFER_ERROR => {
                warn!(error_code = code, "Payload download failed");
                ctx.trigger_event(Event::DownloadFailed);
            }
            other => {
                warn!(error_code = other, "Payload verification failed");
                ctx.trigger_event(Event::VerificationFailed);
            }
        }
    }
}

#[async_trait]
impl UpdateActionHandler for AbUpdateActionHandler {
    fn initialize(&self, updater: WeakUpdater) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Err(e) = self.engine.bind(Arc::new(CallbackBridge { tx })) {
            error!(error = %e, "Failed to bind update engine, A/B progress will not be reported");
            return;
        }

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(updater) = updater.upgrade() else { break };
                Updater::deliver(&updater, event).await;
            }
            debug!("Update engine callback pump stopped");
        });
    }

    async fn handle(&self, ctx: &UpdaterContext<'_>, state: &State, action: &Action) -> Handling {
        match (action, state) {
            (Action::CheckForUpdate { background }, _) => {
                self.check.run(ctx, state, *background).await
            }
            (Action::DownloadUpdate, State::UpdateAvailable { ota, .. }) => {
                self.download(ctx, ota).await
            }
            (Action::Reboot, State::RebootNeeded { ota }) => self.reboot(ctx, ota).await,
            _ => Handling::NotAllowed,
        }
    }

    async fn on_platform_event(
        &self,
        ctx: &UpdaterContext<'_>,
        _state: &State,
        event: PlatformEvent,
    ) {
        match event {
            PlatformEvent::EngineStatus { status, percent } => {
                self.on_status(ctx, status, percent)
            }
            PlatformEvent::PayloadApplicationComplete { error_code } => {
                self.on_complete(ctx, error_code)
            }
        }
    }
}
