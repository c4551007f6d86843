//! # Formula Composer
//!
//! Multi-canister dispense as one all-or-nothing transaction.
//!
//! # Architecture Note
//! A commit holds the full lock set for the formula's canisters, ascending by
//! id, from the start of the check phase to the end of the commit phase:
//!
//! ```text
//!   Composed ──▶ Checking ──▶ Committing ──▶ Committed
//!                    │             │
//!                    ▼             ▼
//!        Aborted(InsufficientVolume)  Aborted(EmergencyStopActive | ConcurrencyConflict)
//! ```
//!
//! Between the two phases the emergency latch is consulted. Emergency stop
//! engages the latch before it queues on any lock, so a commit that is
//! already past its check phase aborts at its next step and releases the
//! locks, and the stop then proceeds with the registry exactly as it was
//! before the formula began.

use crate::actuator::EmergencyLatch;
use crate::audit::AuditSink;
use crate::error::{ControlError, ControlResult, Shortfall};
use crate::level::strict_transition;
use crate::model::{
    AbortReason, AuditDetails, AuditEvent, CanisterId, DispenseFormula, DispenseReceipt, FormulaState,
};
use crate::registry::CanisterRegistry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts a commit as in flight for as long as it lives.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds a commit between its check and commit phases.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct PhaseGate {
    pub checked: Arc<tokio::sync::Notify>,
    pub resume: Arc<tokio::sync::Notify>,
}

pub struct FormulaComposer {
    registry: Arc<CanisterRegistry>,
    latch: Arc<EmergencyLatch>,
    audit: Arc<dyn AuditSink>,
    in_flight: AtomicUsize,
    #[cfg(test)]
    phase_gate: Option<PhaseGate>,
}

impl FormulaComposer {
    pub fn new(registry: Arc<CanisterRegistry>, latch: Arc<EmergencyLatch>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            registry,
            latch,
            audit,
            in_flight: AtomicUsize::new(0),
            #[cfg(test)]
            phase_gate: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_phase_gate(mut self, gate: PhaseGate) -> Self {
        self.phase_gate = Some(gate);
        self
    }

    /// Number of commits currently between lock acquisition and completion.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Validates a withdrawal request.
    ///
    /// Every id must exist and every volume be finite and non-negative.
    /// Zero entries are dropped; if nothing is left the formula is empty.
    pub async fn compose(&self, requested: BTreeMap<CanisterId, f64>) -> ControlResult<DispenseFormula> {
        let known = self.registry.ids().await;
        for (id, volume) in &requested {
            if known.binary_search(id).is_err() {
                return Err(ControlError::Validation(format!("formula references unknown {}", id)));
            }
            if !volume.is_finite() || *volume < 0.0 {
                return Err(ControlError::Validation(format!(
                    "volume for {} must be a finite, non-negative number, got {}",
                    id, volume
                )));
            }
        }

        let volumes: BTreeMap<CanisterId, f64> =
            requested.into_iter().filter(|(_, volume)| *volume > 0.0).collect();
        if volumes.is_empty() {
            return Err(ControlError::EmptyFormula);
        }

        let formula = DispenseFormula::new(volumes);
        debug!(state = ?FormulaState::Composed, ?formula, "Formula composed");
        Ok(formula)
    }

    /// Dispenses `formula` with the two-phase check/commit protocol.
    ///
    /// # Errors
    /// - `EmergencyStopActive` if the latch is engaged, or was tripped after
    ///   the check phase began.
    /// - `InsufficientVolume` with one shortfall per canister that cannot
    ///   cover its share.
    /// - `ConcurrencyConflict` if the lock set could not be acquired in time,
    ///   or the strict withdrawal failed at commit.
    /// - `Validation` if a canister was removed since the formula was composed.
    ///
    /// On any error no canister has changed.
    pub async fn commit(&self, formula: &DispenseFormula) -> ControlResult<DispenseReceipt> {
        let _in_flight = InFlight::enter(&self.in_flight);
        let ids = formula.canister_ids();

        if self.latch.is_active() {
            return Err(self.abort(&ids, ControlError::EmergencyStopActive));
        }
        let epoch = self.latch.epoch();

        let mut guard = match self.registry.lock_many(&ids).await {
            Ok(guard) => guard,
            Err(ControlError::CanisterNotFound(id)) => {
                let error = ControlError::Validation(format!("formula references {} which no longer exists", id));
                return Err(self.abort(&ids, error));
            }
            Err(e) => return Err(self.abort(&ids, e)),
        };
        debug!(state = ?FormulaState::Checking, canisters = ids.len(), "Locks acquired");

        let shortfalls: Vec<Shortfall> = guard
            .snapshot()
            .iter()
            .filter_map(|canister| {
                let requested_ml = formula.volume_for(canister.id)?;
                (requested_ml > canister.level_ml).then(|| Shortfall {
                    canister_id: canister.id,
                    requested_ml,
                    available_ml: canister.level_ml,
                    shortfall_ml: requested_ml - canister.level_ml,
                })
            })
            .collect();
        if !shortfalls.is_empty() {
            drop(guard);
            return Err(self.abort(&ids, ControlError::InsufficientVolume { shortfalls }));
        }

        #[cfg(test)]
        if let Some(gate) = &self.phase_gate {
            gate.checked.notify_one();
            gate.resume.notified().await;
        }

        if self.latch.tripped_since(epoch) {
            drop(guard);
            return Err(self.abort(&ids, ControlError::EmergencyStopActive));
        }
        debug!(state = ?FormulaState::Committing, "Check passed");

        let limits = guard.limits();
        let applied = guard.apply(|canisters| {
            canisters
                .iter()
                .map(|c| strict_transition(c, -formula.volume_for(c.id).unwrap_or(0.0), &limits))
                .collect()
        });
        drop(guard);
        let transitions = match applied {
            Ok(transitions) => transitions,
            Err(ControlError::Capacity { canister_id, .. }) => {
                let error = ControlError::ConcurrencyConflict(format!(
                    "{} changed between check and commit; retry the formula",
                    canister_id
                ));
                return Err(self.abort(&ids, error));
            }
            Err(e) => return Err(self.abort(&ids, e)),
        };

        let canisters: Vec<_> = transitions.into_iter().map(|t| t.after).collect();
        let reserve_alerts: Vec<CanisterId> = canisters
            .iter()
            .filter(|c| c.is_below_reserve(limits.reserve_level_ml))
            .map(|c| c.id)
            .collect();
        let receipt = DispenseReceipt {
            dispensed: formula.volumes().clone(),
            total_ml: formula.total_volume_ml(),
            canisters,
            reserve_alerts,
        };

        info!(
            state = ?FormulaState::Committed,
            canisters = receipt.canisters.len(),
            total_ml = receipt.total_ml,
            "Formula dispensed"
        );
        self.audit.emit(AuditEvent::now(
            None,
            AuditDetails::FormulaCommitted {
                dispensed: receipt.dispensed.clone(),
                total_ml: receipt.total_ml,
            },
        ));
        for canister in receipt.canisters.iter().filter(|c| receipt.reserve_alerts.contains(&c.id)) {
            warn!(canister = %canister.id, level_ml = canister.level_ml, "Canister below reserve level");
            self.audit.emit(AuditEvent::now(
                Some(canister.id),
                AuditDetails::Reserve {
                    level_ml: canister.level_ml,
                    reserve_level_ml: limits.reserve_level_ml,
                },
            ));
        }

        Ok(receipt)
    }

    fn abort(&self, ids: &[CanisterId], error: ControlError) -> ControlError {
        let reason = abort_reason(&error);
        warn!(state = ?reason.map(FormulaState::Aborted), error = %error, "Formula aborted");
        self.audit.emit(AuditEvent::now(
            None,
            AuditDetails::FormulaAborted {
                canisters: ids.to_vec(),
                reason: error.to_string(),
            },
        ));
        error
    }
}

fn abort_reason(error: &ControlError) -> Option<AbortReason> {
    match error {
        ControlError::InsufficientVolume { .. } => Some(AbortReason::InsufficientVolume),
        ControlError::EmergencyStopActive => Some(AbortReason::EmergencyStopActive),
        ControlError::ConcurrencyConflict(_) => Some(AbortReason::ConcurrencyConflict),
        _ => None,
    }
}
