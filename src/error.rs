//! # Control Errors
//!
//! Every operation in the control core returns [`ControlResult`]. The variants
//! carry enough context (canister ids, requested and available volumes) for a
//! front end to explain a rejection without re-querying the registry.
//!
//! ## Propagation Policy
//! - Validation and capacity errors are raised *before* any mutation.
//! - `ConcurrencyConflict` and the hardware errors are reported for an explicit
//!   retry by the caller. The core never retries on the caller's behalf.
//! - Nothing here is fatal: the core keeps serving after any failed command.

use crate::model::{ActuatorCommand, CanisterId, PumpDirection};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result alias used across the crate.
pub type ControlResult<T> = Result<T, ControlError>;

/// One canister's unmet share of a formula.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shortfall {
    pub canister_id: CanisterId,
    pub requested_ml: f64,
    pub available_ml: f64,
    pub shortfall_ml: f64,
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} short by {} ml (requested {}, available {})",
            self.canister_id, self.shortfall_ml, self.requested_ml, self.available_ml
        )
    }
}

/// Errors surfaced by the control core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControlError {
    /// Bad id, negative or non-finite volume, malformed formula.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A strict level adjustment would leave `[0, max_level]`.
    #[error("Capacity error on {canister_id}: level {level_ml} ml + {delta_ml} ml is outside [0, {max_level_ml}]")]
    Capacity {
        canister_id: CanisterId,
        level_ml: f64,
        delta_ml: f64,
        max_level_ml: f64,
    },

    /// Check phase of a formula commit found canisters without enough colorant.
    #[error("Insufficient volume in {} canister(s): {}", .shortfalls.len(), join_shortfalls(.shortfalls))]
    InsufficientVolume { shortfalls: Vec<Shortfall> },

    /// Direct `Up <-> Down` pump reversal.
    #[error("Unsafe pump transition on {canister_id}: {from} -> {to} (switch Off first)")]
    UnsafeTransition {
        canister_id: CanisterId,
        from: PumpDirection,
        to: PumpDirection,
    },

    /// A mutator produced a state that breaks a registry invariant.
    #[error("Invariant violation on {canister_id}: {reason}")]
    InvariantViolation {
        canister_id: CanisterId,
        reason: String,
    },

    /// Lock acquisition timed out, or a concurrent commit changed the levels.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Rejected while the emergency-stop latch is engaged.
    #[error("Emergency stop active")]
    EmergencyStopActive,

    /// A formula whose volumes are all zero.
    #[error("Formula is empty: at least one volume must be greater than zero")]
    EmptyFormula,

    #[error("Canister not found: {0}")]
    CanisterNotFound(CanisterId),

    /// The canister is locked by an in-flight operation and cannot be removed.
    #[error("Canister busy: {0}")]
    CanisterBusy(CanisterId),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The driver did not acknowledge within the timeout, retry included.
    #[error("Hardware timeout on {canister_id} for {command:?}")]
    HardwareTimeout {
        canister_id: CanisterId,
        command: ActuatorCommand,
    },

    /// The driver reported a fault.
    #[error("Hardware fault on {canister_id} for {command:?}: {reason}")]
    HardwareFault {
        canister_id: CanisterId,
        command: ActuatorCommand,
        reason: String,
    },

    /// The control mailbox is closed.
    #[error("Actor closed")]
    ActorClosed,

    /// The control mailbox dropped the response channel.
    #[error("Actor dropped response channel")]
    ActorDropped,
}

fn join_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ControlError {
    /// True for errors the caller may resolve by simply re-issuing the command.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControlError::ConcurrencyConflict(_)
                | ControlError::CanisterBusy(_)
                | ControlError::HardwareTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_volume_lists_every_shortfall() {
        let err = ControlError::InsufficientVolume {
            shortfalls: vec![Shortfall {
                canister_id: CanisterId(2),
                requested_ml: 600.0,
                available_ml: 500.0,
                shortfall_ml: 100.0,
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("1 canister(s)"));
        assert!(msg.contains("canister_2 short by 100 ml"));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ControlError::ConcurrencyConflict("timeout".into()).is_retryable());
        assert!(ControlError::CanisterBusy(CanisterId(3)).is_retryable());
        assert!(!ControlError::EmergencyStopActive.is_retryable());
        assert!(!ControlError::EmptyFormula.is_retryable());
    }
}
