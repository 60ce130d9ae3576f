//! Action handler interface and the release check shared by both strategies.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::platform::ReleaseChecker;

use super::policy::InstallPolicy;
use super::scheduler::UpdateScheduler;
use super::state::{Action, Event, State};
use super::store::CachedOtaProvider;
use super::updater::{UpdaterContext, WeakUpdater};

/// Outcome of offering an action to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    /// The action was legal in the current state and has been processed
    Applied,
    /// The action is not legal in the current state; nothing happened
    NotAllowed,
}

/// Asynchronous report from the platform, marshalled into the updater.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlatformEvent {
    /// Update engine status change; `percent` is 0.0..=1.0
    EngineStatus { status: i32, percent: f32 },
    /// Update engine finished applying a payload
    PayloadApplicationComplete { error_code: i32 },
}

/// One update strategy (A/B or recovery).
///
/// Handlers run inside the updater's serialized section and are the only
/// code publishing states. Every failure must resolve into a valid state.
#[async_trait]
pub trait UpdateActionHandler: Send + Sync {
    /// Called once when the updater is created.
    fn initialize(&self, _updater: WeakUpdater) {}

    /// Process `action` in `state`, or decline it.
    async fn handle(&self, ctx: &UpdaterContext<'_>, state: &State, action: &Action) -> Handling;

    /// Process a platform callback.
    async fn on_platform_event(
        &self,
        _ctx: &UpdaterContext<'_>,
        _state: &State,
        event: PlatformEvent,
    ) {
        warn!(event = ?event, "Platform event not expected by this update mechanism");
    }
}

/// The `Idle + CheckForUpdate` edge, identical for both strategies.
#[derive(Clone)]
pub struct ReleaseCheck {
    checker: Arc<dyn ReleaseChecker>,
    cache: Arc<dyn CachedOtaProvider>,
    scheduler: Arc<dyn UpdateScheduler>,
    policy: InstallPolicy,
}

impl ReleaseCheck {
    pub fn new(
        checker: Arc<dyn ReleaseChecker>,
        cache: Arc<dyn CachedOtaProvider>,
        scheduler: Arc<dyn UpdateScheduler>,
        policy: InstallPolicy,
    ) -> Self {
        Self { checker, cache, scheduler, policy }
    }

    pub fn cache(&self) -> &Arc<dyn CachedOtaProvider> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<dyn UpdateScheduler> {
        &self.scheduler
    }

    pub fn policy(&self) -> &InstallPolicy {
        &self.policy
    }

    /// Run the check if `state` allows it.
    #[instrument(skip(self, ctx, state))]
    pub async fn run(&self, ctx: &UpdaterContext<'_>, state: &State, background: bool) -> Handling {
        if !state.allows_update_check() {
            return Handling::NotAllowed;
        }

        ctx.set_state(State::CheckingForUpdates);

        let ota = match self.checker.latest_release().await {
            Ok(ota) => ota,
            Err(e) => {
                warn!(error = %e, "Release check failed, treating as no release");
                None
            }
        };

        let Some(ota) = ota else {
            info!("No update available");
            ctx.set_state(State::Idle);
            ctx.trigger_event(Event::NoUpdatesAvailable);
            return Handling::Applied;
        };

        if let Err(e) = self.cache.set(Some(&ota)) {
            warn!(error = %e, version = %ota.version, "Failed to cache release");
        }

        let forced = self.policy.is_forced(&ota);
        info!(version = %ota.version, forced, background, "Update available");

        ctx.set_state(State::UpdateAvailable {
            ota: ota.clone(),
            show_notification: background && !forced,
            background,
        });

        if forced {
            self.scheduler.schedule_download(&ota, ctx.updater());
        }

        Handling::Applied
    }
}
