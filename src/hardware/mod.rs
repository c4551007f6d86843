//! # Hardware Boundary
//!
//! The core talks to the physical machine through a [`HardwareDriver`]. The
//! wire protocol behind it (serial, network) is the driver's concern.
//!
//! [`HardwareLink`] wraps a driver with the acknowledgment policy: every
//! command gets `ack_timeout` to be acknowledged, one retry on timeout, and
//! then the affected actuators are marked [`ActuatorHealth::Degraded`] and
//! the failure is returned to the caller. A later acknowledgment restores
//! them to `Nominal`.
//!
//! Commands for one canister reach the driver in the order the registry
//! applied them, one at a time. A caller takes a [`Ticket`] while it still
//! holds the canister lock and sends it after releasing the lock. A
//! `SafeState` ticket cuts short any older command still queued or waiting for
//! its acknowledgment on that canister; such a command is not retried and its
//! caller gets `EmergencyStopActive`.
//!
//! The link never touches canister state. By the time it is called, the
//! registry already reflects the commanded state.

mod lane;
pub mod mock;
pub mod simulated;

use crate::error::{ControlError, ControlResult};
use crate::model::{ActuatorCommand, ActuatorHealth, ActuatorKind, CanisterId};
use async_trait::async_trait;
use lane::{Lane, Turn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, warn};

pub use lane::Ticket;
pub use mock::MockDriver;
pub use simulated::SimulatedDriver;

/// Attempts per command: the first send plus one retry.
pub const SEND_ATTEMPTS: u32 = 2;

/// What the driver reported for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverReply {
    Ack,
    Timeout,
    Fault(String),
}

/// Port to the physical actuators.
#[async_trait]
pub trait HardwareDriver: Send + Sync {
    async fn send_actuator_command(&self, canister_id: CanisterId, command: ActuatorCommand) -> DriverReply;
}

/// A driver plus the acknowledgment policy and per-actuator health.
pub struct HardwareLink {
    driver: Arc<dyn HardwareDriver>,
    ack_timeout: Duration,
    degraded: Mutex<BTreeSet<(CanisterId, ActuatorKind)>>,
    lanes: Mutex<BTreeMap<CanisterId, Arc<Lane>>>,
}

impl HardwareLink {
    pub fn new(driver: Arc<dyn HardwareDriver>, ack_timeout: Duration) -> Self {
        Self {
            driver,
            ack_timeout,
            degraded: Mutex::new(BTreeSet::new()),
            lanes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reserves the next place on `canister_id`'s lane for `command`.
    ///
    /// Call this under the canister lock, in the same step as the mutation.
    pub fn ticket(&self, canister_id: CanisterId, command: ActuatorCommand) -> Ticket {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            lanes.entry(canister_id).or_insert_with(|| Arc::new(Lane::new())).clone()
        };
        Ticket::issue(lane, canister_id, command)
    }

    /// Ticket and send in one step, for callers with nothing to order against.
    pub async fn dispatch(&self, canister_id: CanisterId, command: ActuatorCommand) -> ControlResult<()> {
        self.send(self.ticket(canister_id, command)).await
    }

    /// Waits for the ticket's turn, sends its command and waits for the
    /// acknowledgment.
    ///
    /// # Errors
    /// - `HardwareTimeout` when neither attempt was acknowledged in time.
    /// - `HardwareFault` when the driver reported a fault (not retried).
    /// - `EmergencyStopActive` when a later `SafeState` on the same canister
    ///   superseded the command. Health is left as it was.
    pub async fn send(&self, ticket: Ticket) -> ControlResult<()> {
        let (canister_id, command) = (ticket.canister_id(), ticket.command());
        let lane = ticket.lane();

        if lane.wait_turn(ticket.seq(), command).await == Turn::Superseded {
            warn!(canister = %canister_id, ?command, "Superseded by safe state before sending");
            return Err(ControlError::EmergencyStopActive);
        }

        for attempt in 1..=SEND_ATTEMPTS {
            let reply = tokio::select! {
                biased;
                _ = lane.superseded(ticket.seq(), command) => {
                    warn!(canister = %canister_id, ?command, attempt, "Superseded by safe state, not retried");
                    return Err(ControlError::EmergencyStopActive);
                }
                reply = tokio::time::timeout(
                    self.ack_timeout,
                    self.driver.send_actuator_command(canister_id, command),
                ) => reply.unwrap_or(DriverReply::Timeout),
            };

            match reply {
                DriverReply::Ack => {
                    self.set_health(canister_id, command, ActuatorHealth::Nominal);
                    debug!(canister = %canister_id, ?command, attempt, "Hardware ack");
                    return Ok(());
                }
                DriverReply::Timeout => {
                    warn!(canister = %canister_id, ?command, attempt, timeout = ?self.ack_timeout, "No hardware ack");
                }
                DriverReply::Fault(reason) => {
                    self.set_health(canister_id, command, ActuatorHealth::Degraded);
                    error!(canister = %canister_id, ?command, %reason, "Hardware fault, actuator degraded");
                    return Err(ControlError::HardwareFault {
                        canister_id,
                        command,
                        reason,
                    });
                }
            }
        }

        self.set_health(canister_id, command, ActuatorHealth::Degraded);
        error!(canister = %canister_id, ?command, "Actuator degraded after retry");
        Err(ControlError::HardwareTimeout { canister_id, command })
    }

    pub fn health(&self, canister_id: CanisterId, actuator: ActuatorKind) -> ActuatorHealth {
        if self.degraded_set().contains(&(canister_id, actuator)) {
            ActuatorHealth::Degraded
        } else {
            ActuatorHealth::Nominal
        }
    }

    pub fn degraded(&self) -> Vec<(CanisterId, ActuatorKind)> {
        self.degraded_set().iter().copied().collect()
    }

    pub fn any_degraded(&self) -> bool {
        !self.degraded_set().is_empty()
    }

    /// Drops health records and lanes of canisters that no longer exist.
    pub fn forget(&self, removed: &[CanisterId]) {
        self.degraded_set().retain(|(id, _)| !removed.contains(id));
        self.lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|id, _| !removed.contains(id));
    }

    fn set_health(&self, canister_id: CanisterId, command: ActuatorCommand, health: ActuatorHealth) {
        let mut degraded = self.degraded_set();
        for actuator in command.actuators() {
            match health {
                ActuatorHealth::Degraded => degraded.insert((canister_id, *actuator)),
                ActuatorHealth::Nominal => degraded.remove(&(canister_id, *actuator)),
            };
        }
    }

    fn degraded_set(&self) -> MutexGuard<'_, BTreeSet<(CanisterId, ActuatorKind)>> {
        self.degraded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
