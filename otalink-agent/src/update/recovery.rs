//! Recovery-partition update strategy: download, verify, then install through
//! recovery. The downloader runs outside the serialized section and reports
//! back through `DownloadProgress`, `DownloadCompleted` and `DownloadFailed`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::platform::{DownloadStarter, RecoveryInterface, SoftwareVersion};

use super::handler::{Handling, ReleaseCheck, UpdateActionHandler};
use super::ota::Ota;
use super::state::{Action, Event, State};
use super::updater::UpdaterContext;

pub struct RecoveryUpdateActionHandler {
    recovery: Arc<dyn RecoveryInterface>,
    downloader: Arc<dyn DownloadStarter>,
    version: Arc<dyn SoftwareVersion>,
    check: ReleaseCheck,
}

impl RecoveryUpdateActionHandler {
    pub fn new(
        recovery: Arc<dyn RecoveryInterface>,
        downloader: Arc<dyn DownloadStarter>,
        version: Arc<dyn SoftwareVersion>,
        check: ReleaseCheck,
    ) -> Self {
        Self { recovery, downloader, version, check }
    }

    /// The download can be retried from here.
    fn download_failed(ctx: &UpdaterContext<'_>, ota: &Ota) {
        ctx.set_state(State::UpdateAvailable {
            ota: ota.clone(),
            show_notification: false,
            background: false,
        });
        ctx.trigger_event(Event::DownloadFailed);
    }

    #[instrument(skip(self, ctx, ota), fields(version = %ota.version))]
    fn start_download(&self, ctx: &UpdaterContext<'_>, ota: &Ota) {
        match self.downloader.start_download(&ota.url, ctx.updater()) {
            Ok(()) => ctx.set_state(State::UpdateDownloading { ota: ota.clone(), progress: 0 }),
            Err(e) => {
                warn!(error = %e, url = %ota.url, "Could not start download");
                Self::download_failed(ctx, ota);
            }
        }
    }

    #[instrument(skip(self, ctx, ota), fields(version = %ota.version))]
    async fn verify(&self, ctx: &UpdaterContext<'_>, ota: &Ota, path: &Path) {
        match self.recovery.verify(path, ota).await {
            Ok(()) => {
                info!(path = %path.display(), "Package verified");
                ctx.set_state(State::ReadyToInstall { ota: ota.clone(), path: path.to_path_buf() });
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Package verification failed");
                ctx.set_state(State::Idle);
                ctx.trigger_event(Event::VerificationFailed);
            }
        }
    }

    #[instrument(skip(self, ctx, ota), fields(version = %ota.version))]
    async fn install(&self, ctx: &UpdaterContext<'_>, ota: &Ota, path: &Path) {
        let updating_from_version = self.version.current_version().await;
        ctx.set_state(State::RebootedForInstallation {
            ota: ota.clone(),
            updating_from_version,
        });

        if let Err(e) = self.recovery.install(path).await {
            // Nothing was installed, so the device must not claim it rebooted for one
            error!(error = %e, path = %path.display(), "Recovery install failed");
            ctx.set_state(State::Idle);
        }
    }
}

#[async_trait]
impl UpdateActionHandler for RecoveryUpdateActionHandler {
    async fn handle(&self, ctx: &UpdaterContext<'_>, state: &State, action: &Action) -> Handling {
        match (action, state) {
            (Action::CheckForUpdate { background }, _) => {
                return self.check.run(ctx, state, *background).await;
            }
            (Action::DownloadUpdate, State::UpdateAvailable { ota, .. }) => {
                self.start_download(ctx, ota)
            }
            (Action::DownloadProgress(progress), State::UpdateDownloading { ota, .. }) => {
                ctx.set_state(State::UpdateDownloading {
                    ota: ota.clone(),
                    progress: (*progress).min(100),
                });
            }
            (Action::DownloadCompleted(path), State::UpdateDownloading { ota, .. }) => {
                self.verify(ctx, ota, path).await;
            }
            (Action::DownloadFailed, State::UpdateDownloading { ota, .. }) => {
                Self::download_failed(ctx, ota)
            }
            (Action::InstallUpdate, State::ReadyToInstall { ota, path }) => {
                self.install(ctx, ota, path).await
            }
            _ => return Handling::NotAllowed,
        }
        Handling::Applied
    }
}
