//! # Configuration Stores
//!
//! The core reads machine limits from a [`ConfigurationStore`] at startup and
//! on explicit reconfiguration. It never writes them back; persistence is the
//! store's concern.

use crate::error::{ControlError, ControlResult};
use crate::model::{LevelSeed, MachineConfig, RuntimeSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Source of the machine configuration.
pub trait ConfigurationStore: Send + Sync {
    fn load_config(&self) -> ControlResult<MachineConfig>;

    /// Runtime tuning. Stores without a runtime section use the defaults.
    fn load_runtime(&self) -> ControlResult<RuntimeSettings> {
        Ok(RuntimeSettings::default())
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Holds a configuration in memory. `replace` swaps it for the next load.
#[derive(Debug, Default)]
pub struct StaticConfigStore {
    machine: Mutex<MachineConfig>,
    runtime: RuntimeSettings,
}

impl StaticConfigStore {
    pub fn new(machine: MachineConfig) -> Self {
        Self {
            machine: Mutex::new(machine),
            runtime: RuntimeSettings::default(),
        }
    }

    pub fn with_runtime(mut self, runtime: RuntimeSettings) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn replace(&self, machine: MachineConfig) {
        *self.machine() = machine;
    }

    fn machine(&self) -> MutexGuard<'_, MachineConfig> {
        self.machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConfigurationStore for StaticConfigStore {
    fn load_config(&self) -> ControlResult<MachineConfig> {
        Ok(self.machine().clone())
    }

    fn load_runtime(&self) -> ControlResult<RuntimeSettings> {
        Ok(self.runtime.clone())
    }
}

// =============================================================================
// JSON FILE STORE
// =============================================================================

#[derive(Debug, Deserialize)]
struct ConfigFile {
    machine: MachineConfig,
    #[serde(default)]
    runtime: RuntimeSettings,
}

/// Reads `{ "machine": {...}, "runtime": {...} }` from a JSON file on every
/// load. Missing fields take their defaults; the `runtime` section is
/// optional.
///
/// Runtime values can be overridden from the environment:
/// `TINT_LOCK_TIMEOUT_MS`, `TINT_ACK_TIMEOUT_MS` and `TINT_LEVEL_SEED`.
#[derive(Debug, Clone)]
pub struct JsonFileConfigStore {
    path: PathBuf,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> ControlResult<ConfigFile> {
        debug!(path = ?self.path, "Reading configuration file");
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            ControlError::ConfigInvalid(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            ControlError::ConfigInvalid(format!("cannot parse {}: {}", self.path.display(), e))
        })
    }
}

impl ConfigurationStore for JsonFileConfigStore {
    fn load_config(&self) -> ControlResult<MachineConfig> {
        let machine = self.read()?.machine;
        machine.validate()?;
        info!(
            path = ?self.path,
            model = %machine.model_number,
            canisters = machine.num_canisters,
            "Machine configuration loaded"
        );
        Ok(machine)
    }

    fn load_runtime(&self) -> ControlResult<RuntimeSettings> {
        let mut runtime = self.read()?.runtime;
        apply_env_overrides(&mut runtime);
        Ok(runtime)
    }
}

fn apply_env_overrides(runtime: &mut RuntimeSettings) {
    if let Some(ms) = env_number("TINT_LOCK_TIMEOUT_MS") {
        runtime.lock_timeout_ms = ms;
    }
    if let Some(ms) = env_number("TINT_ACK_TIMEOUT_MS") {
        runtime.ack_timeout_ms = ms;
    }
    if let Some(seed) = env_number("TINT_LEVEL_SEED") {
        runtime.level_seed = LevelSeed::Seeded(seed);
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, value = %raw, "Ignoring non-numeric environment override");
            None
        }
    }
}
