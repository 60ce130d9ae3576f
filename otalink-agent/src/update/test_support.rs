//! Fakes for the platform collaborators, shared by the update tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;
use tokio::sync::{broadcast, Notify};

use crate::error::{OtaError, Result};
use crate::platform::{
    DeviceSignals, DownloadStarter, RebootDevice, RecoveryInterface, ReleaseChecker,
    SoftwareVersion, UpdateEngine, UpdateEngineCallback,
};

use super::handler::{Handling, UpdateActionHandler};
use super::ota::{Ota, PAYLOAD_OFFSET_KEY, PAYLOAD_SIZE_KEY};
use super::policy::DeviceConditions;
use super::scheduler::UpdateScheduler;
use super::state::{Action, Event, State};
use super::updater::{Updater, UpdaterContext, WeakUpdater};

pub const OLD_SOFTWARE_VERSION: &str = "old";

pub fn test_ota() -> Ota {
    let mut ota = Ota::new("http://localhost/ota.zip", "1.3.2");
    ota.release_notes = "Fixed some bugs, added some new features.".to_string();
    for (key, value) in [
        ("METADATA_HASH", "z4x6Wb+qNYpMKA7+KnMcbSFK6fxX8vbyEzhK2gBfJbQ="),
        ("FILE_SIZE", "99449"),
        ("METADATA_SIZE", "51846"),
        ("FILE_HASH", "X9zpqKb2z15s5eNhRuzntqYlPSB011/aGcdftaTRsrI="),
        (PAYLOAD_SIZE_KEY, "99449"),
        (PAYLOAD_OFFSET_KEY, "1295"),
    ] {
        ota.artifact_metadata.insert(key.to_string(), value.to_string());
    }
    ota
}

/// Receive exactly `n` states, failing the test after a second.
pub async fn recv_states(rx: &mut broadcast::Receiver<State>, n: usize) -> Vec<State> {
    let mut states = Vec::with_capacity(n);
    for _ in 0..n {
        let state = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a state")
            .expect("transition channel closed");
        states.push(state);
    }
    states
}

/// Receive one event, failing the test after a second.
pub async fn recv_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Collects everything the updater published since creation.
pub struct StateRecorder {
    states: Mutex<broadcast::Receiver<State>>,
    events: Mutex<broadcast::Receiver<Event>>,
}

impl StateRecorder {
    pub fn new(updater: &Updater) -> Self {
        Self {
            states: Mutex::new(updater.transitions()),
            events: Mutex::new(updater.events()),
        }
    }

    pub fn drain(&self) -> Vec<State> {
        let mut rx = self.states.lock().unwrap();
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    pub fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().unwrap();
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }
}

/// Accepts every action and records it. A check returns straight to idle.
#[derive(Default)]
pub struct RecordingHandler {
    actions: Mutex<Vec<Action>>,
    notify: Notify,
}

impl RecordingHandler {
    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.notify.notified();
                if self.actions.lock().unwrap().len() >= n {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for actions");
    }
}

#[async_trait]
impl UpdateActionHandler for RecordingHandler {
    async fn handle(&self, ctx: &UpdaterContext<'_>, _state: &State, action: &Action) -> Handling {
        self.actions.lock().unwrap().push(action.clone());
        if matches!(action, Action::CheckForUpdate { .. }) {
            ctx.set_state(State::Idle);
        }
        self.notify.notify_waiters();
        Handling::Applied
    }
}

/// Settable gating signals.
pub struct FakeSignals {
    conditions: Mutex<DeviceConditions>,
}

impl FakeSignals {
    pub fn new(conditions: DeviceConditions) -> Self {
        Self { conditions: Mutex::new(conditions) }
    }

    /// 04:00, charging for two hours, setup done.
    pub fn window_open() -> Self {
        Self::new(DeviceConditions {
            user_setup_complete: true,
            charging: true,
            plugged_in_for: Some(Duration::from_secs(2 * 3600)),
            local_time: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            build_time_utc: None,
        })
    }

    /// 14:00 on battery, setup done.
    pub fn window_closed() -> Self {
        Self::new(DeviceConditions {
            user_setup_complete: true,
            charging: false,
            plugged_in_for: None,
            local_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            build_time_utc: None,
        })
    }

    pub fn snapshot(&self) -> DeviceConditions {
        self.conditions.lock().unwrap().clone()
    }

    pub fn set(&self, conditions: DeviceConditions) {
        *self.conditions.lock().unwrap() = conditions;
    }

    pub fn update(&self, f: impl FnOnce(&mut DeviceConditions)) {
        f(&mut self.conditions.lock().unwrap());
    }
}

#[async_trait]
impl DeviceSignals for FakeSignals {
    async fn conditions(&self) -> DeviceConditions {
        self.snapshot()
    }
}

pub struct FakeVersion(String);

impl FakeVersion {
    pub fn new(version: &str) -> Self {
        Self(version.to_string())
    }
}

#[async_trait]
impl SoftwareVersion for FakeVersion {
    async fn current_version(&self) -> String {
        self.0.clone()
    }
}

/// Returns whatever release is configured, or an error.
#[derive(Default)]
pub struct FakeChecker {
    release: Mutex<Option<Ota>>,
    fail: Mutex<bool>,
}

impl FakeChecker {
    pub fn with_release(ota: Option<Ota>) -> Self {
        Self { release: Mutex::new(ota), fail: Mutex::new(false) }
    }

    pub fn failing() -> Self {
        Self { release: Mutex::new(None), fail: Mutex::new(true) }
    }
}

#[async_trait]
impl ReleaseChecker for FakeChecker {
    async fn latest_release(&self) -> Result<Option<Ota>> {
        if *self.fail.lock().unwrap() {
            return Err(OtaError::CheckFailed("connection refused".to_string()));
        }
        Ok(self.release.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    pub downloads: Mutex<Vec<Ota>>,
    pub installs: Mutex<Vec<Ota>>,
}

impl UpdateScheduler for RecordingScheduler {
    fn schedule_download(&self, ota: &Ota, _updater: WeakUpdater) {
        self.downloads.lock().unwrap().push(ota.clone());
    }

    fn schedule_install(&self, ota: &Ota, _updater: WeakUpdater) {
        self.installs.lock().unwrap().push(ota.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPayload {
    pub url: String,
    pub offset: u64,
    pub size: u64,
    pub headers: Vec<String>,
}

/// Update engine that records payload requests and lets the test fire callbacks.
#[derive(Default)]
pub struct FakeEngine {
    callbacks: Mutex<Vec<Arc<dyn UpdateEngineCallback>>>,
    pub applied: Mutex<Vec<AppliedPayload>>,
    pub reject_apply: Mutex<bool>,
}

impl FakeEngine {
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub fn status_update(&self, status: i32, percent: f32) {
        for callback in self.callbacks.lock().unwrap().iter() {
            callback.on_status_update(status, percent);
        }
    }

    pub fn payload_complete(&self, error_code: i32) {
        for callback in self.callbacks.lock().unwrap().iter() {
            callback.on_payload_application_complete(error_code);
        }
    }
}

#[async_trait]
impl UpdateEngine for FakeEngine {
    fn bind(&self, callback: Arc<dyn UpdateEngineCallback>) -> Result<()> {
        self.callbacks.lock().unwrap().push(callback);
        Ok(())
    }

    async fn apply_payload(
        &self,
        url: &str,
        offset: u64,
        size: u64,
        headers: &[String],
    ) -> Result<()> {
        if *self.reject_apply.lock().unwrap() {
            return Err(OtaError::Engine("already in progress".to_string()));
        }
        self.applied.lock().unwrap().push(AppliedPayload {
            url: url.to_string(),
            offset,
            size,
            headers: headers.to_vec(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRecovery {
    pub verified: Mutex<Vec<PathBuf>>,
    pub installed: Mutex<Vec<PathBuf>>,
    pub fail_verify: Mutex<bool>,
    pub fail_install: Mutex<bool>,
}

#[async_trait]
impl RecoveryInterface for FakeRecovery {
    async fn verify(&self, path: &Path, _ota: &Ota) -> Result<()> {
        self.verified.lock().unwrap().push(path.to_path_buf());
        if *self.fail_verify.lock().unwrap() {
            return Err(OtaError::VerificationFailed("oops".to_string()));
        }
        Ok(())
    }

    async fn install(&self, path: &Path) -> Result<()> {
        self.installed.lock().unwrap().push(path.to_path_buf());
        if *self.fail_install.lock().unwrap() {
            return Err(OtaError::InstallFailed("oops".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDownloader {
    pub started: Mutex<Vec<String>>,
    pub fail: Mutex<bool>,
}

impl DownloadStarter for FakeDownloader {
    fn start_download(&self, url: &str, _updater: WeakUpdater) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(OtaError::DownloadFailed("no space left".to_string()));
        }
        self.started.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeReboot {
    pub count: Mutex<usize>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl RebootDevice for FakeReboot {
    async fn reboot(&self) -> Result<()> {
        *self.count.lock().unwrap() += 1;
        if *self.fail.lock().unwrap() {
            return Err(OtaError::RebootFailed("permission denied".to_string()));
        }
        Ok(())
    }
}
