//! # Actuator Controller
//!
//! Validates and applies agitator, valve and pump commands, and owns the
//! emergency stop.
//!
//! Every command follows the same path: mutate the canister through
//! [`CanisterRegistry::atomic_update`] and take its hardware [`Ticket`] in the
//! same step, emit `ActuatorChanged`, then send the ticket through the
//! [`HardwareLink`]. The registry reflects the commanded state as soon as the
//! mutation succeeds; a hardware timeout or fault afterwards is returned to
//! the caller but does not roll the state back.
//!
//! An emergency stop tickets `SafeState` under the same locks, so a command
//! still waiting on the hardware when the stop lands is dropped and its
//! caller gets `EmergencyStopActive`. The driver never sees it after the
//! safe state.
//!
//! Repeating a command that changes nothing is a no-op success with no audit
//! event. It is still re-sent to the hardware when the actuator is degraded,
//! which is how an operator recovers a degraded actuator.

mod latch;

pub use latch::EmergencyLatch;

use crate::audit::AuditSink;
use crate::error::{ControlError, ControlResult};
use crate::hardware::{HardwareLink, Ticket};
use crate::model::{
    ActuatorCommand, ActuatorHealth, AuditDetails, AuditEvent, Canister, CanisterId, PumpDirection,
};
use crate::registry::{CanisterRegistry, Transition};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result of [`ActuatorController::emergency_stop_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyStopReport {
    /// False when the latch was already engaged.
    pub newly_engaged: bool,
    /// Every canister after the stop, ascending by id.
    pub canisters: Vec<Canister>,
    /// Safe-state commands the hardware did not acknowledge.
    #[serde(skip)]
    pub hardware_failures: Vec<ControlError>,
}

pub struct ActuatorController {
    registry: Arc<CanisterRegistry>,
    hardware: Arc<HardwareLink>,
    latch: Arc<EmergencyLatch>,
    audit: Arc<dyn AuditSink>,
}

impl ActuatorController {
    pub fn new(
        registry: Arc<CanisterRegistry>,
        hardware: Arc<HardwareLink>,
        latch: Arc<EmergencyLatch>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            hardware,
            latch,
            audit,
        }
    }

    pub fn latch(&self) -> &Arc<EmergencyLatch> {
        &self.latch
    }

    pub async fn set_agitator(&self, id: CanisterId, on: bool) -> ControlResult<Canister> {
        let command = ActuatorCommand::Agitator(on);
        let mut ticket = None;
        let transition = self
            .registry
            .atomic_update(id, |c, _| {
                ticket = Some(self.hardware.ticket(id, command));
                Ok(Canister {
                    agitator_on: on,
                    ..c.clone()
                })
            })
            .await
            .inspect_err(|e| warn!(canister = %id, on, error = %e, "Agitator command rejected"))?;
        self.finish(command, transition, ticket).await
    }

    pub async fn set_valve(&self, id: CanisterId, open: bool) -> ControlResult<Canister> {
        let command = ActuatorCommand::Valve(open);
        let mut ticket = None;
        let transition = self
            .registry
            .atomic_update(id, |c, _| {
                ticket = Some(self.hardware.ticket(id, command));
                Ok(Canister {
                    valve_open: open,
                    ..c.clone()
                })
            })
            .await
            .inspect_err(|e| warn!(canister = %id, open, error = %e, "Valve command rejected"))?;
        self.finish(command, transition, ticket).await
    }

    /// Sets the pump direction.
    ///
    /// # Errors
    /// `UnsafeTransition` for a direct `Up <-> Down` change; the caller must
    /// switch the pump `Off` first.
    pub async fn set_pump(&self, id: CanisterId, direction: PumpDirection) -> ControlResult<Canister> {
        let command = ActuatorCommand::Pump(direction);
        let mut ticket = None;
        let transition = self
            .registry
            .atomic_update(id, |c, _| {
                if c.pump.reverses_into(direction) {
                    return Err(ControlError::UnsafeTransition {
                        canister_id: c.id,
                        from: c.pump,
                        to: direction,
                    });
                }
                ticket = Some(self.hardware.ticket(id, command));
                Ok(Canister {
                    pump: direction,
                    ..c.clone()
                })
            })
            .await
            .inspect_err(|e| warn!(canister = %id, %direction, error = %e, "Pump command rejected"))?;
        self.finish(command, transition, ticket).await
    }

    /// Puts every canister in its safe state and engages the emergency latch.
    ///
    /// The latch is engaged before any lock is requested, so an in-flight
    /// formula commit sees it at its commit phase and aborts. The safe state is
    /// then applied to all canisters in one multi-update and a `SafeState`
    /// command goes to every canister's hardware concurrently, ahead of any
    /// older command still pending there. Unacknowledged safe-state commands
    /// are listed in the report; they do not fail the stop.
    ///
    /// Idempotent. If the lock set cannot be acquired in time the call returns
    /// `ConcurrencyConflict` and the latch stays engaged.
    pub async fn emergency_stop_all(&self) -> ControlResult<EmergencyStopReport> {
        let newly_engaged = self.latch.engage();
        error!(newly_engaged, "Emergency stop");

        let ids = self.registry.ids().await;
        let mut tickets = Vec::with_capacity(ids.len());
        let transitions = if ids.is_empty() {
            Vec::new()
        } else {
            self.registry
                .atomic_multi_update(&ids, |canisters| {
                    tickets.extend(
                        canisters
                            .iter()
                            .map(|c| self.hardware.ticket(c.id, ActuatorCommand::SafeState)),
                    );
                    Ok(canisters.iter().map(Canister::safe_state).collect())
                })
                .await
                .inspect_err(|e| error!(error = %e, "Emergency safe state not applied"))?
        };

        self.audit.emit(AuditEvent::now(
            None,
            AuditDetails::EmergencyStop {
                engaged: true,
                canisters: transitions.len(),
            },
        ));

        let mut dispatches = JoinSet::new();
        for ticket in tickets {
            let hardware = self.hardware.clone();
            dispatches.spawn(async move { hardware.send(ticket).await });
        }
        let mut hardware_failures = Vec::new();
        while let Some(joined) = dispatches.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => hardware_failures.push(e),
                Err(e) => error!(error = %e, "Safe-state dispatch task failed"),
            }
        }

        info!(
            canisters = transitions.len(),
            hardware_failures = hardware_failures.len(),
            "All canisters in safe state"
        );
        Ok(EmergencyStopReport {
            newly_engaged,
            canisters: transitions.into_iter().map(|t| t.after).collect(),
            hardware_failures,
        })
    }

    /// Releases the emergency latch. Returns `false` (and does nothing) if it
    /// was not engaged.
    pub fn clear_emergency(&self) -> bool {
        let was_active = self.latch.clear();
        if was_active {
            info!("Emergency latch cleared");
            self.audit.emit(AuditEvent::now(
                None,
                AuditDetails::EmergencyStop {
                    engaged: false,
                    canisters: 0,
                },
            ));
        } else {
            debug!("Emergency latch not engaged; nothing to clear");
        }
        was_active
    }

    pub fn is_emergency_active(&self) -> bool {
        self.latch.is_active()
    }

    async fn finish(
        &self,
        command: ActuatorCommand,
        transition: Transition,
        ticket: Option<Ticket>,
    ) -> ControlResult<Canister> {
        let id = transition.id();
        if transition.changed() {
            info!(canister = %id, ?command, "Actuator changed");
            self.audit.emit(AuditEvent::now(Some(id), AuditDetails::Actuator { command }));
        } else if self.is_healthy(id, command) {
            debug!(canister = %id, ?command, "Actuator already in requested state");
            return Ok(transition.after);
        }

        let ticket = ticket.unwrap_or_else(|| self.hardware.ticket(id, command));
        self.hardware.send(ticket).await?;
        Ok(transition.after)
    }

    fn is_healthy(&self, id: CanisterId, command: ActuatorCommand) -> bool {
        command
            .actuators()
            .iter()
            .all(|actuator| self.hardware.health(id, *actuator) == ActuatorHealth::Nominal)
    }
}
