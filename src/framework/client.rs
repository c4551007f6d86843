//! # Control Client
//!
//! Cloneable, typed front of the control mailbox. Holds only a sender, so
//! cloning is cheap and clones can be handed to any number of tasks.

use super::message::{ControlRequest, Response};
use crate::actuator::EmergencyStopReport;
use crate::error::{ControlError, ControlResult};
use crate::level::LevelAdjustment;
use crate::model::{
    Canister, CanisterId, DispenseFormula, DispenseReceipt, FillSummary, MachineConfig, MachineStatus,
    PumpDirection,
};
use crate::registry::ResizeOutcome;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct ControlClient {
    sender: mpsc::Sender<ControlRequest>,
}

impl ControlClient {
    pub fn new(sender: mpsc::Sender<ControlRequest>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(Response<T>) -> ControlRequest) -> ControlResult<T> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| ControlError::ActorClosed)?;
        response.await.map_err(|_| ControlError::ActorDropped)?
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> ControlResult<Vec<Canister>> {
        self.request(|respond_to| ControlRequest::List { respond_to }).await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: CanisterId) -> ControlResult<Canister> {
        self.request(|respond_to| ControlRequest::Get { id, respond_to }).await
    }

    #[instrument(skip(self))]
    pub async fn set_agitator(&self, id: CanisterId, on: bool) -> ControlResult<Canister> {
        self.request(|respond_to| ControlRequest::SetAgitator { id, on, respond_to })
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_valve(&self, id: CanisterId, open: bool) -> ControlResult<Canister> {
        self.request(|respond_to| ControlRequest::SetValve { id, open, respond_to })
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_pump(&self, id: CanisterId, direction: PumpDirection) -> ControlResult<Canister> {
        self.request(|respond_to| ControlRequest::SetPump {
            id,
            direction,
            respond_to,
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn emergency_stop_all(&self) -> ControlResult<EmergencyStopReport> {
        self.request(|respond_to| ControlRequest::EmergencyStopAll { respond_to })
            .await
    }

    /// Returns whether the latch was engaged.
    #[instrument(skip(self))]
    pub async fn clear_emergency(&self) -> ControlResult<bool> {
        self.request(|respond_to| ControlRequest::ClearEmergency { respond_to })
            .await
    }

    #[instrument(skip(self))]
    pub async fn apply_clamped(&self, id: CanisterId, delta_ml: f64) -> ControlResult<LevelAdjustment> {
        self.request(|respond_to| ControlRequest::ApplyClamped {
            id,
            delta_ml,
            respond_to,
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn apply_strict(&self, id: CanisterId, delta_ml: f64) -> ControlResult<LevelAdjustment> {
        self.request(|respond_to| ControlRequest::ApplyStrict {
            id,
            delta_ml,
            respond_to,
        })
        .await
    }

    #[instrument(skip(self, volumes))]
    pub async fn compose(&self, volumes: BTreeMap<CanisterId, f64>) -> ControlResult<DispenseFormula> {
        debug!(?volumes, "compose called");
        self.request(|respond_to| ControlRequest::Compose { volumes, respond_to })
            .await
    }

    #[instrument(skip(self, formula), fields(canisters = formula.volumes().len()))]
    pub async fn commit(&self, formula: DispenseFormula) -> ControlResult<DispenseReceipt> {
        debug!(?formula, "commit called");
        self.request(|respond_to| ControlRequest::Commit { formula, respond_to })
            .await
    }

    /// Composes and commits in one call.
    pub async fn dispense(&self, volumes: BTreeMap<CanisterId, f64>) -> ControlResult<DispenseReceipt> {
        let formula = self.compose(volumes).await?;
        self.commit(formula).await
    }

    #[instrument(skip(self))]
    pub async fn resize(&self, new_count: u32) -> ControlResult<ResizeOutcome> {
        self.request(|respond_to| ControlRequest::Resize { new_count, respond_to })
            .await
    }

    #[instrument(skip(self, config))]
    pub async fn reconfigure(&self, config: MachineConfig) -> ControlResult<ResizeOutcome> {
        debug!(?config, "reconfigure called");
        self.request(|respond_to| ControlRequest::Reconfigure { config, respond_to })
            .await
    }

    #[instrument(skip(self))]
    pub async fn status(&self) -> ControlResult<MachineStatus> {
        self.request(|respond_to| ControlRequest::Status { respond_to }).await
    }

    #[instrument(skip(self))]
    pub async fn summary(&self) -> ControlResult<FillSummary> {
        self.request(|respond_to| ControlRequest::Summary { respond_to }).await
    }
}
