//! Machine-wide configuration DTOs.
//!
//! [`MachineConfig`] is owned by the external configuration store and is
//! read-only to the core. [`RuntimeSettings`] tunes the core itself (lock and
//! acknowledgment timeouts, level seeding, mailbox size).

use crate::error::{ControlError, ControlResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Physical link used to reach the dispenser board. Carried, never interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommMode {
    #[default]
    Usb,
    WiFi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommSettings {
    pub mode: CommMode,
    pub port: String,
}

impl Default for CommSettings {
    fn default() -> Self {
        Self {
            mode: CommMode::Usb,
            port: "COM3".to_string(),
        }
    }
}

/// Machine identity and operating limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub model_number: String,
    pub serial_number: String,
    pub install_date: String,
    pub num_canisters: u32,
    pub max_level_ml: f64,
    pub reserve_level_ml: f64,
    pub comm: CommSettings,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            model_number: "VOEM-TX-2000".to_string(),
            serial_number: "SN-8829-XJ".to_string(),
            install_date: "2023-10-15".to_string(),
            num_canisters: 16,
            max_level_ml: 3000.0,
            reserve_level_ml: 500.0,
            comm: CommSettings::default(),
        }
    }
}

impl MachineConfig {
    /// Config with the given slot count and limits, factory identity otherwise.
    pub fn with_limits(num_canisters: u32, max_level_ml: f64, reserve_level_ml: f64) -> Self {
        Self {
            num_canisters,
            max_level_ml,
            reserve_level_ml,
            ..Self::default()
        }
    }

    /// Checks the limits the core depends on.
    ///
    /// # Errors
    /// `ConfigInvalid` when there are no canisters, the maximum is not a positive
    /// finite number, or the reserve is outside `[0, max_level_ml]`.
    pub fn validate(&self) -> ControlResult<()> {
        if self.num_canisters == 0 {
            return Err(ControlError::ConfigInvalid(
                "num_canisters must be at least 1".to_string(),
            ));
        }
        if !self.max_level_ml.is_finite() || self.max_level_ml <= 0.0 {
            return Err(ControlError::ConfigInvalid(format!(
                "max_level_ml must be a positive finite number, got {}",
                self.max_level_ml
            )));
        }
        if !self.reserve_level_ml.is_finite() || self.reserve_level_ml < 0.0 {
            return Err(ControlError::ConfigInvalid(format!(
                "reserve_level_ml must be a non-negative finite number, got {}",
                self.reserve_level_ml
            )));
        }
        if self.reserve_level_ml > self.max_level_ml {
            return Err(ControlError::ConfigInvalid(format!(
                "reserve_level_ml ({}) exceeds max_level_ml ({})",
                self.reserve_level_ml, self.max_level_ml
            )));
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_level_ml: self.max_level_ml,
            reserve_level_ml: self.reserve_level_ml,
        }
    }
}

/// The two numbers every level rule is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Limits {
    pub max_level_ml: f64,
    pub reserve_level_ml: f64,
}

impl Limits {
    pub fn contains(&self, level_ml: f64) -> bool {
        level_ml.is_finite() && (0.0..=self.max_level_ml).contains(&level_ml)
    }
}

/// How initial canister levels are chosen at registry initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LevelSeed {
    /// Every canister starts at the same level.
    Uniform(f64),
    /// Levels listed by slot; slots past the end of the list start empty.
    Explicit(Vec<f64>),
    /// Reproducible pseudo-random levels in `[500, 2500)` ml.
    Seeded(u64),
}

impl Default for LevelSeed {
    fn default() -> Self {
        LevelSeed::Seeded(0x5EED)
    }
}

/// Tuning of the core itself, independent of the machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Bound on acquiring canister locks before `ConcurrencyConflict`.
    pub lock_timeout_ms: u64,
    /// Bound on one hardware acknowledgment (one retry follows a timeout).
    pub ack_timeout_ms: u64,
    pub level_seed: LevelSeed,
    /// Capacity of the control mailbox.
    pub mailbox_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            ack_timeout_ms: 500,
            level_seed: LevelSeed::default(),
            mailbox_capacity: 32,
        }
    }
}

impl RuntimeSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_defaults_are_valid() {
        let config = MachineConfig::default();
        assert_eq!(config.num_canisters, 16);
        assert_eq!(config.max_level_ml, 3000.0);
        assert_eq!(config.reserve_level_ml, 500.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reserve_above_max_is_rejected() {
        let config = MachineConfig::with_limits(4, 1000.0, 1500.0);
        assert!(matches!(config.validate(), Err(ControlError::ConfigInvalid(_))));
    }

    #[test]
    fn zero_canisters_is_rejected() {
        let config = MachineConfig::with_limits(0, 1000.0, 100.0);
        assert!(matches!(config.validate(), Err(ControlError::ConfigInvalid(_))));
    }

    #[test]
    fn non_finite_max_is_rejected() {
        let config = MachineConfig::with_limits(2, f64::NAN, 0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: MachineConfig =
            serde_json::from_str(r#"{ "num_canisters": 4, "reserve_level_ml": 250.0 }"#).unwrap();
        assert_eq!(config.num_canisters, 4);
        assert_eq!(config.max_level_ml, 3000.0);
        assert_eq!(config.comm.mode, CommMode::Usb);
    }

    #[test]
    fn limits_reject_nan_and_out_of_range() {
        let limits = MachineConfig::with_limits(1, 100.0, 10.0).limits();
        assert!(limits.contains(0.0));
        assert!(limits.contains(100.0));
        assert!(!limits.contains(100.5));
        assert!(!limits.contains(-0.1));
        assert!(!limits.contains(f64::NAN));
    }
}
