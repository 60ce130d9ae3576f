//! Update orchestration
//!
//! The [`Updater`] owns the update [`State`] and serializes every [`Action`]
//! and platform callback. The work itself is done by one of two
//! [`UpdateActionHandler`] strategies chosen at startup:
//!
//! - [`AbUpdateActionHandler`]: the platform update engine streams the payload
//!   into the inactive slot, a reboot switches slots
//! - [`RecoveryUpdateActionHandler`]: the package is downloaded and verified,
//!   then installed by rebooting into recovery
//!
//! Around the core sit the gating policy, the boot-time reconciliation, the
//! auto-installer and the schedulers.

pub mod ab_update;
pub mod auto_install;
pub mod boot;
pub mod handler;
pub mod ota;
pub mod policy;
pub mod recovery;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod updater;

#[cfg(test)]
pub(crate) mod test_support;

pub use ab_update::AbUpdateActionHandler;
pub use auto_install::AutoInstaller;
pub use boot::BootCompletion;
pub use handler::{Handling, PlatformEvent, ReleaseCheck, UpdateActionHandler};
pub use ota::Ota;
pub use policy::{DeviceConditions, InstallPolicy, MaintenanceWindow};
pub use recovery::RecoveryUpdateActionHandler;
pub use scheduler::{PeriodicCheck, TaskScheduler, UpdateScheduler};
pub use state::{Action, Event, State};
pub use store::{
    CachedOtaProvider, FileCachedOtaProvider, FileStateStore, MemoryCachedOtaProvider,
    MemoryStateStore, StateStore,
};
pub use updater::{Updater, UpdaterContext, WeakUpdater};
