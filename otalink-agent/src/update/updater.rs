//! The updater: single owner and serializer of the update state.
//!
//! Every writer goes through one FIFO mutex: caller actions (`perform`),
//! platform callbacks (`deliver`) and boot-time reconciliation
//! (`exclusive`). Handlers publish states and events through the
//! [`UpdaterContext`] they receive while that mutex is held.

use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use super::handler::{Handling, PlatformEvent, UpdateActionHandler};
use super::state::{Action, Event, State};
use super::store::StateStore;

/// Capacity of the transition and event channels. Slow subscribers lag.
const CHANNEL_CAPACITY: usize = 64;

struct Inner {
    handler: Arc<dyn UpdateActionHandler>,
    store: Arc<dyn StateStore>,
    serial: Mutex<()>,
    state: watch::Sender<State>,
    transitions: broadcast::Sender<State>,
    events: broadcast::Sender<Event>,
}

/// Handle to the updater. Cloning is cheap and shares the same state.
#[derive(Clone)]
pub struct Updater {
    inner: Arc<Inner>,
}

/// Non-owning handle, held by collaborators that report back into the updater.
#[derive(Clone)]
pub struct WeakUpdater {
    inner: Weak<Inner>,
}

impl WeakUpdater {
    /// `None` once the updater was dropped.
    pub fn upgrade(&self) -> Option<Updater> {
        self.inner.upgrade().map(|inner| Updater { inner })
    }

    /// Perform `action` if the updater is still alive.
    pub async fn perform(&self, action: Action) {
        match self.upgrade() {
            Some(updater) => updater.perform(action).await,
            None => debug!(action = action.name(), "Updater gone, dropping action"),
        }
    }
}

/// Write access to the updater, only handed out under the serialization lock.
pub struct UpdaterContext<'a> {
    inner: &'a Arc<Inner>,
}

impl UpdaterContext<'_> {
    /// Publish a new current state.
    pub fn set_state(&self, state: State) {
        if let Err(e) = self.inner.store.save(&state) {
            warn!(error = %e, state = %state, "Failed to persist update state");
        }

        let previous = self.inner.state.send_replace(state.clone());
        info!(from = %previous, to = %state, "Update state changed");

        // No subscribers is fine
        let _ = self.inner.transitions.send(state);
    }

    /// Emit a one-shot event to current subscribers.
    pub fn trigger_event(&self, event: Event) {
        info!(event = ?event, "Update event");
        let _ = self.inner.events.send(event);
    }

    /// Current state as last published.
    pub fn state(&self) -> State {
        self.inner.state.borrow().clone()
    }

    /// Handle for collaborators that report back asynchronously.
    pub fn updater(&self) -> WeakUpdater {
        WeakUpdater { inner: Arc::downgrade(self.inner) }
    }
}

impl Updater {
    /// Create the updater, restoring a persisted `RebootedForInstallation`.
    ///
    /// Any other persisted state is stale after a restart and the updater
    /// starts `Idle`. Must be called within a tokio runtime: the handler may
    /// spawn its callback pump here.
    pub fn new(handler: Arc<dyn UpdateActionHandler>, store: Arc<dyn StateStore>) -> Self {
        let initial = match store.load() {
            Some(state @ State::RebootedForInstallation { .. }) => {
                info!(state = %state, "Restored update state");
                state
            }
            _ => State::Idle,
        };
        Self::with_state(handler, store, initial)
    }

    /// Create the updater in a given state.
    pub fn with_state(
        handler: Arc<dyn UpdateActionHandler>,
        store: Arc<dyn StateStore>,
        initial: State,
    ) -> Self {
        let (state, _) = watch::channel(initial);
        let (transitions, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);

        let updater = Self {
            inner: Arc::new(Inner {
                handler,
                store,
                serial: Mutex::new(()),
                state,
                transitions,
                events,
            }),
        };

        updater.inner.handler.initialize(updater.downgrade());
        updater
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.inner.state.borrow().clone()
    }

    /// Observe the current state. New receivers see the current value at once.
    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.inner.state.subscribe()
    }

    /// Every state published from now on, in order.
    pub fn transitions(&self) -> broadcast::Receiver<State> {
        self.inner.transitions.subscribe()
    }

    /// Events emitted from now on. Earlier events are not replayed.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn downgrade(&self) -> WeakUpdater {
        WeakUpdater { inner: Arc::downgrade(&self.inner) }
    }

    /// Submit an action.
    ///
    /// Waits behind any action or callback in progress. Actions the handler
    /// does not accept in the current state are dropped with a warning. A
    /// duplicate update check is rejected up front without waiting.
    pub async fn perform(&self, action: Action) {
        if matches!(action, Action::CheckForUpdate { .. }) {
            let current = self.state();
            if !current.allows_update_check() {
                warn!(
                    action = action.name(),
                    state = %current,
                    "Update check not allowed, dropping"
                );
                return;
            }
        }

        let _serial = self.inner.serial.lock().await;
        let state = self.state();
        let ctx = UpdaterContext { inner: &self.inner };

        debug!(action = action.name(), state = %state, "Handling action");
        match self.inner.handler.handle(&ctx, &state, &action).await {
            Handling::Applied => {}
            Handling::NotAllowed => {
                warn!(
                    action = ?action,
                    state = %state,
                    "Action not allowed in current state, dropping"
                );
            }
        }
    }

    /// Route a platform callback through the same serialization point as actions.
    pub async fn deliver(&self, event: PlatformEvent) {
        let _serial = self.inner.serial.lock().await;
        let state = self.state();
        let ctx = UpdaterContext { inner: &self.inner };
        self.inner.handler.on_platform_event(&ctx, &state, event).await;
    }

    /// Run `f` with write access while no action or callback is processed.
    pub async fn exclusive<R>(&self, f: impl FnOnce(&UpdaterContext<'_>, &State) -> R) -> R {
        let _serial = self.inner.serial.lock().await;
        let state = self.state();
        let ctx = UpdaterContext { inner: &self.inner };
        f(&ctx, &state)
    }
}
