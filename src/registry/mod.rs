//! # Canister Registry
//!
//! Sole owner of canister state. Every other component reads and writes
//! canisters through the primitives here and never touches a canister field
//! directly.
//!
//! # Architecture Note
//! Each canister lives behind its own `tokio::sync::Mutex`; the set of slots
//! and the machine limits sit behind one `RwLock` that is only ever held
//! briefly (to look a slot up, or by `resize` to swap the set). Multi-canister
//! operations sort their ids and acquire the slot locks in ascending order,
//! so two overlapping callers can never wait on each other in a cycle. The
//! whole acquisition is bounded by `lock_timeout`.
//!
//! Limits are read *after* the canister locks are held. `reconfigure` needs
//! every survivor unlocked before it may lower the maximum, so a held lock
//! set always validates against current limits.

mod guard;
pub mod seed;

pub use guard::{CanisterSetGuard, Transition};

use crate::error::{ControlError, ControlResult};
use crate::model::{Canister, CanisterId, LevelSeed, Limits, MachineConfig};
use guard::HoldToken;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

#[derive(Clone)]
struct Slot {
    cell: Arc<Mutex<Canister>>,
    holds: Arc<AtomicUsize>,
}

impl Slot {
    fn new(canister: Canister) -> Self {
        Self {
            cell: Arc::new(Mutex::new(canister)),
            holds: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct RegistryState {
    config: MachineConfig,
    slots: BTreeMap<CanisterId, Slot>,
}

/// Ids added and removed by a `resize` or `reconfigure`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResizeOutcome {
    pub added: Vec<CanisterId>,
    pub removed: Vec<CanisterId>,
}

pub struct CanisterRegistry {
    state: RwLock<RegistryState>,
    lock_timeout: Duration,
}

impl CanisterRegistry {
    /// Creates `num_canisters` canisters with ids `1..=n`, all actuators off,
    /// levels taken from `seed`.
    pub fn initialize(
        config: MachineConfig,
        seed: &LevelSeed,
        lock_timeout: Duration,
    ) -> ControlResult<Self> {
        config.validate()?;
        let levels = seed::initial_levels(seed, config.num_canisters, config.max_level_ml);
        let slots = levels
            .into_iter()
            .zip(1..)
            .map(|(level, id)| {
                let id = CanisterId(id);
                (id, Slot::new(Canister::new(id, level)))
            })
            .collect::<BTreeMap<_, _>>();

        info!(
            canisters = slots.len(),
            max_level_ml = config.max_level_ml,
            reserve_level_ml = config.reserve_level_ml,
            "Canister registry initialized"
        );

        Ok(Self {
            state: RwLock::new(RegistryState { config, slots }),
            lock_timeout,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub async fn config(&self) -> MachineConfig {
        self.state.read().await.config.clone()
    }

    pub async fn limits(&self) -> Limits {
        self.state.read().await.config.limits()
    }

    pub async fn ids(&self) -> Vec<CanisterId> {
        self.state.read().await.slots.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of one canister.
    pub async fn get(&self, id: CanisterId) -> ControlResult<Canister> {
        let slot = self.slot(id).await?;
        let canister = self.lock_cell(id, &slot).await?;
        Ok(canister.clone())
    }

    /// Consistent snapshot of every canister, ascending by id.
    ///
    /// All locks are held together for the copy, so the result never mixes
    /// states from before and after one multi-update.
    pub async fn list(&self) -> ControlResult<Vec<Canister>> {
        let slots: Vec<(CanisterId, Slot)> = {
            let state = self.state.read().await;
            state.slots.iter().map(|(id, slot)| (*id, slot.clone())).collect()
        };
        let entries = self.acquire_ordered(&slots).await?;
        Ok(entries.iter().map(|(_, guard)| (**guard).clone()).collect())
    }

    /// Applies a pure transition to one canister under its lock.
    ///
    /// The mutator gets the current limits, read after the lock is taken, so
    /// it targets the same bounds the result is validated against. The result
    /// must keep the same id, a level inside `[0, max_level]`, and must not
    /// reverse the pump directly; otherwise `InvariantViolation` is returned
    /// and the canister keeps its prior state. Errors returned by the mutator
    /// itself are passed through unchanged.
    pub async fn atomic_update<F>(&self, id: CanisterId, mutator: F) -> ControlResult<Transition>
    where
        F: FnOnce(&Canister, &Limits) -> ControlResult<Canister>,
    {
        let slot = self.slot(id).await?;
        let mut cell = self.lock_cell(id, &slot).await?;
        let limits = {
            let state = self.state.read().await;
            match state.slots.get(&id) {
                Some(current) if Arc::ptr_eq(&current.cell, &slot.cell) => {}
                _ => return Err(ControlError::CanisterNotFound(id)),
            }
            state.config.limits()
        };

        let before = cell.clone();
        let after = mutator(&before, &limits)?;
        validate_transition(&before, &after, &limits)?;
        *cell = after.clone();

        debug!(canister = %id, ?after, "Canister updated");
        Ok(Transition { before, after, limits })
    }

    /// [`atomic_update`](Self::atomic_update) across a set of canisters,
    /// applied or rejected as one unit.
    pub async fn atomic_multi_update<F>(
        &self,
        ids: &[CanisterId],
        mutator: F,
    ) -> ControlResult<Vec<Transition>>
    where
        F: FnOnce(&[Canister]) -> ControlResult<Vec<Canister>>,
    {
        let mut guard = self.lock_many(ids).await?;
        guard.apply(mutator)
    }

    /// Acquires the locks for `ids` in ascending order and hands back a guard
    /// for a check-then-commit sequence.
    ///
    /// Duplicate ids are collapsed. The canisters are marked as held from the
    /// moment they are looked up, so `resize` cannot remove them while this
    /// call is still queued on their locks.
    pub async fn lock_many(&self, ids: &[CanisterId]) -> ControlResult<CanisterSetGuard> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Err(ControlError::Validation(
                "multi-canister operation references no canisters".to_string(),
            ));
        }

        let (slots, holds) = {
            let state = self.state.read().await;
            let slots = ids
                .iter()
                .map(|id| {
                    state
                        .slots
                        .get(id)
                        .cloned()
                        .map(|slot| (*id, slot))
                        .ok_or(ControlError::CanisterNotFound(*id))
                })
                .collect::<ControlResult<Vec<_>>>()?;
            let holds = HoldToken::acquire(slots.iter().map(|(_, s)| s.holds.clone()).collect());
            (slots, holds)
        };

        let entries = self.acquire_ordered(&slots).await?;
        let limits = self.limits().await;

        Ok(CanisterSetGuard {
            entries,
            limits,
            _holds: holds,
        })
    }

    /// Grows or shrinks the canister set, keeping the current limits.
    ///
    /// New canisters get ids after the current highest, all actuators off and
    /// an empty level. Shrinking removes the highest ids and fails
    /// `CanisterBusy` if any of them is locked by an in-flight operation.
    pub async fn resize(&self, new_count: u32) -> ControlResult<ResizeOutcome> {
        let mut config = self.config().await;
        config.num_canisters = new_count;
        self.apply_config(config).await
    }

    /// Adopts a new machine configuration: resizes as [`resize`](Self::resize)
    /// does and switches to the new limits.
    ///
    /// Fails `ConfigInvalid` if a surviving canister holds more than the new
    /// maximum.
    pub async fn reconfigure(&self, config: MachineConfig) -> ControlResult<ResizeOutcome> {
        self.apply_config(config).await
    }

    async fn apply_config(&self, config: MachineConfig) -> ControlResult<ResizeOutcome> {
        config.validate()?;
        let mut state = self.state.write().await;
        let new_count = config.num_canisters;
        let keep_until = CanisterId(new_count);

        // Lock every canister that goes away. Nothing else can pick up these
        // slots while the write lock is held.
        let mut removing: Vec<OwnedMutexGuard<Canister>> = Vec::new();
        for (id, slot) in state.slots.range(CanisterId(new_count.saturating_add(1))..) {
            if slot.holds.load(Ordering::SeqCst) > 0 {
                warn!(canister = %id, "Resize refused: canister held by an in-flight operation");
                return Err(ControlError::CanisterBusy(*id));
            }
            let guard = slot.cell.clone().try_lock_owned().map_err(|_| {
                warn!(canister = %id, "Resize refused: canister locked");
                ControlError::CanisterBusy(*id)
            })?;
            removing.push(guard);
        }

        if config.max_level_ml < state.config.max_level_ml {
            for (id, slot) in state.slots.range(..=keep_until) {
                let canister = slot
                    .cell
                    .try_lock()
                    .map_err(|_| ControlError::CanisterBusy(*id))?;
                if canister.level_ml > config.max_level_ml {
                    return Err(ControlError::ConfigInvalid(format!(
                        "{} holds {} ml, above the new maximum of {} ml",
                        id, canister.level_ml, config.max_level_ml
                    )));
                }
            }
        }

        let removed: Vec<CanisterId> = state
            .slots
            .split_off(&CanisterId(new_count.saturating_add(1)))
            .into_keys()
            .collect();
        drop(removing);

        let current_max = state.slots.keys().next_back().map(|id| id.0).unwrap_or(0);
        let added: Vec<CanisterId> = (current_max + 1..=new_count).map(CanisterId).collect();
        for id in &added {
            state.slots.insert(*id, Slot::new(Canister::new(*id, 0.0)));
        }
        state.config = config;

        info!(
            canisters = state.slots.len(),
            added = added.len(),
            removed = removed.len(),
            "Canister set reconfigured"
        );
        Ok(ResizeOutcome { added, removed })
    }

    async fn slot(&self, id: CanisterId) -> ControlResult<Slot> {
        self.state
            .read()
            .await
            .slots
            .get(&id)
            .cloned()
            .ok_or(ControlError::CanisterNotFound(id))
    }

    async fn lock_cell(&self, id: CanisterId, slot: &Slot) -> ControlResult<OwnedMutexGuard<Canister>> {
        tokio::time::timeout(self.lock_timeout, slot.cell.clone().lock_owned())
            .await
            .map_err(|_| {
                warn!(canister = %id, timeout = ?self.lock_timeout, "Lock acquisition timed out");
                ControlError::ConcurrencyConflict(format!(
                    "timed out after {:?} waiting for {}",
                    self.lock_timeout, id
                ))
            })
    }

    /// Locks `slots` (already ascending) one after another within a single
    /// timeout budget.
    async fn acquire_ordered(
        &self,
        slots: &[(CanisterId, Slot)],
    ) -> ControlResult<Vec<(CanisterId, OwnedMutexGuard<Canister>)>> {
        let acquire = async {
            let mut entries = Vec::with_capacity(slots.len());
            for (id, slot) in slots {
                entries.push((*id, slot.cell.clone().lock_owned().await));
            }
            entries
        };

        tokio::time::timeout(self.lock_timeout, acquire)
            .await
            .map_err(|_| {
                warn!(canisters = slots.len(), timeout = ?self.lock_timeout, "Lock set acquisition timed out");
                ControlError::ConcurrencyConflict(format!(
                    "timed out after {:?} acquiring locks on {} canister(s)",
                    self.lock_timeout,
                    slots.len()
                ))
            })
    }
}

/// Checks the registry invariants for one `before -> after` step.
pub(crate) fn validate_transition(
    before: &Canister,
    after: &Canister,
    limits: &Limits,
) -> ControlResult<()> {
    let violation = |reason: String| ControlError::InvariantViolation {
        canister_id: before.id,
        reason,
    };

    if after.id != before.id {
        return Err(violation(format!("id changed to {}", after.id)));
    }
    if !limits.contains(after.level_ml) {
        return Err(violation(format!(
            "level {} ml outside [0, {}]",
            after.level_ml, limits.max_level_ml
        )));
    }
    if before.pump.reverses_into(after.pump) {
        return Err(violation(format!(
            "pump reversed directly from {} to {}",
            before.pump, after.pump
        )));
    }
    Ok(())
}
