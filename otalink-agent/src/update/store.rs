//! Durable single-record stores
//!
//! Two records survive a process restart: the most recently seen release
//! (A/B engine callbacks resume after a restart and need it) and the current
//! update state (boot logic needs `RebootedForInstallation`). Both are one
//! JSON document written atomically.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::{OtaError, Result};

use super::ota::Ota;
use super::state::State;

/// Cache of the most recently seen release.
pub trait CachedOtaProvider: Send + Sync {
    fn get(&self) -> Option<Ota>;
    fn set(&self, ota: Option<&Ota>) -> Result<()>;
}

/// Persistence of the update state.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Option<State>;
    fn save(&self, state: &State) -> Result<()>;
}

/// JSON file holding at most one value. An empty or missing file means "none".
#[derive(Debug, Clone)]
struct JsonSlot {
    path: PathBuf,
}

impl JsonSlot {
    fn read<T: DeserializeOwned>(&self) -> Option<T> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read record");
                return None;
            }
        };

        if content.trim().is_empty() {
            return None;
        }

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable record");
                None
            }
        }
    }

    fn write<T: Serialize>(&self, value: Option<&T>) -> Result<()> {
        let json = match value {
            Some(v) => serde_json::to_string_pretty(v)?,
            None => String::new(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write next to the target so the rename stays on one filesystem
        let temp = self.path.with_extension("tmp");
        std::fs::write(&temp, json)
            .map_err(|e| OtaError::Storage(format!("{}: {}", temp.display(), e)))?;
        std::fs::rename(&temp, &self.path)
            .map_err(|e| OtaError::Storage(format!("{}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), "Record written");
        Ok(())
    }
}

/// File-backed release cache.
#[derive(Debug, Clone)]
pub struct FileCachedOtaProvider {
    slot: JsonSlot,
}

impl FileCachedOtaProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { slot: JsonSlot { path: path.into() } }
    }

    pub fn path(&self) -> &Path {
        &self.slot.path
    }
}

impl CachedOtaProvider for FileCachedOtaProvider {
    fn get(&self) -> Option<Ota> {
        self.slot.read()
    }

    fn set(&self, ota: Option<&Ota>) -> Result<()> {
        self.slot.write(ota)
    }
}

/// File-backed state store.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    slot: JsonSlot,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { slot: JsonSlot { path: path.into() } }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Option<State> {
        self.slot.read()
    }

    fn save(&self, state: &State) -> Result<()> {
        self.slot.write(Some(state))
    }
}

/// In-memory release cache, for tests and hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemoryCachedOtaProvider {
    ota: Mutex<Option<Ota>>,
}

impl MemoryCachedOtaProvider {
    pub fn new(ota: Option<Ota>) -> Self {
        Self { ota: Mutex::new(ota) }
    }
}

impl CachedOtaProvider for MemoryCachedOtaProvider {
    fn get(&self) -> Option<Ota> {
        self.ota.lock().map(|g| g.clone()).unwrap_or(None)
    }

    fn set(&self, ota: Option<&Ota>) -> Result<()> {
        let mut slot = self
            .ota
            .lock()
            .map_err(|_| OtaError::Storage("Lock poisoned".to_string()))?;
        *slot = ota.cloned();
        Ok(())
    }
}

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<State>>,
}

impl MemoryStateStore {
    pub fn new(state: Option<State>) -> Self {
        Self { state: Mutex::new(state) }
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Option<State> {
        self.state.lock().map(|g| g.clone()).unwrap_or(None)
    }

    fn save(&self, state: &State) -> Result<()> {
        let mut slot = self
            .state
            .lock()
            .map_err(|_| OtaError::Storage("Lock poisoned".to_string()))?;
        *slot = Some(state.clone());
        Ok(())
    }
}
