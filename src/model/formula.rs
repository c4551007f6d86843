//! Dispense formulas and their outcomes.

use crate::model::{Canister, CanisterId};
use serde::Serialize;
use std::collections::BTreeMap;

/// A validated, transient request to withdraw colorant from several canisters.
///
/// Built only by [`FormulaComposer::compose`](crate::formula::FormulaComposer::compose),
/// which guarantees every volume is finite and positive and at least one entry
/// exists. The map is ordered by canister id, which is also the lock order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispenseFormula {
    volumes: BTreeMap<CanisterId, f64>,
}

impl DispenseFormula {
    pub(crate) fn new(volumes: BTreeMap<CanisterId, f64>) -> Self {
        Self { volumes }
    }

    pub fn volumes(&self) -> &BTreeMap<CanisterId, f64> {
        &self.volumes
    }

    pub fn canister_ids(&self) -> Vec<CanisterId> {
        self.volumes.keys().copied().collect()
    }

    pub fn volume_for(&self, id: CanisterId) -> Option<f64> {
        self.volumes.get(&id).copied()
    }

    pub fn total_volume_ml(&self) -> f64 {
        self.volumes.values().sum()
    }
}

/// Lifecycle of one commit attempt.
///
/// `Composed`, `Checking` and `Committing` are in-memory only; callers only
/// ever observe `Committed` or one of the `Aborted` reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FormulaState {
    Composed,
    Checking,
    Committing,
    Committed,
    Aborted(AbortReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AbortReason {
    InsufficientVolume,
    EmergencyStopActive,
    ConcurrencyConflict,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispenseReceipt {
    pub dispensed: BTreeMap<CanisterId, f64>,
    pub total_ml: f64,
    /// Post-commit snapshots, ascending by id.
    pub canisters: Vec<Canister>,
    /// Canisters whose post-commit level is below the reserve level.
    pub reserve_alerts: Vec<CanisterId>,
}

impl DispenseReceipt {
    pub fn level_of(&self, id: CanisterId) -> Option<f64> {
        self.canisters
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.level_ml)
    }
}
