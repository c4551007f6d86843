//! Lock guards handed out by the registry.

use super::validate_transition;
use crate::error::{ControlError, ControlResult};
use crate::model::{Canister, CanisterId, Limits};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Before/after pair of one canister mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub before: Canister,
    pub after: Canister,
    /// Limits the step was validated against.
    pub limits: Limits,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }

    pub fn id(&self) -> CanisterId {
        self.after.id
    }
}

/// Marks canisters as held by a multi-canister operation for as long as it lives.
///
/// `resize` refuses to remove a canister with a non-zero hold count, which
/// covers the window where an operation has picked its slots but is still
/// queued on their locks.
pub(crate) struct HoldToken {
    counters: Vec<Arc<AtomicUsize>>,
}

impl HoldToken {
    pub(crate) fn acquire(counters: Vec<Arc<AtomicUsize>>) -> Self {
        for counter in &counters {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Self { counters }
    }
}

impl Drop for HoldToken {
    fn drop(&mut self) {
        for counter in &self.counters {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Exclusive access to a set of canisters, acquired in ascending id order.
///
/// The guard is the unit of a two-phase operation: inspect with
/// [`snapshot`](Self::snapshot) (check phase), then [`apply`](Self::apply)
/// (commit phase). Dropping the guard without applying leaves every canister
/// untouched. Locks are released when the guard drops.
pub struct CanisterSetGuard {
    pub(crate) entries: Vec<(CanisterId, OwnedMutexGuard<Canister>)>,
    pub(crate) limits: Limits,
    pub(crate) _holds: HoldToken,
}

impl CanisterSetGuard {
    pub fn ids(&self) -> Vec<CanisterId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn get(&self, id: CanisterId) -> Option<&Canister> {
        self.entries
            .iter()
            .find(|(held, _)| *held == id)
            .map(|(_, guard)| &**guard)
    }

    /// Current state of every held canister, ascending by id.
    pub fn snapshot(&self) -> Vec<Canister> {
        self.entries.iter().map(|(_, guard)| (**guard).clone()).collect()
    }

    /// Applies `mutator` to the whole set as one unit.
    ///
    /// The mutator receives the snapshots in ascending id order and must return
    /// the replacement states in the same order. If it fails, or any result
    /// breaks a registry invariant, nothing is written.
    pub fn apply<F>(&mut self, mutator: F) -> ControlResult<Vec<Transition>>
    where
        F: FnOnce(&[Canister]) -> ControlResult<Vec<Canister>>,
    {
        let before = self.snapshot();
        let after = mutator(&before)?;
        if after.len() != before.len() {
            let canister_id = before.first().map(|c| c.id).unwrap_or(CanisterId(0));
            return Err(ControlError::InvariantViolation {
                canister_id,
                reason: format!(
                    "multi-update returned {} states for {} canisters",
                    after.len(),
                    before.len()
                ),
            });
        }
        for (old, new) in before.iter().zip(&after) {
            validate_transition(old, new, &self.limits)?;
        }

        for ((_, guard), new) in self.entries.iter_mut().zip(&after) {
            **guard = new.clone();
        }

        let limits = self.limits;
        Ok(before
            .into_iter()
            .zip(after)
            .map(|(before, after)| Transition { before, after, limits })
            .collect())
    }
}
