//! # Control Messages
//!
//! Every client operation is one explicit variant carrying its arguments and a
//! oneshot reply channel. The actor never branches on anything but the
//! variant.

use crate::actuator::EmergencyStopReport;
use crate::error::ControlResult;
use crate::level::LevelAdjustment;
use crate::model::{
    Canister, CanisterId, DispenseFormula, DispenseReceipt, FillSummary, MachineConfig, MachineStatus,
    PumpDirection,
};
use crate::registry::ResizeOutcome;
use std::collections::BTreeMap;
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by the actor.
pub type Response<T> = oneshot::Sender<ControlResult<T>>;

#[derive(Debug)]
pub enum ControlRequest {
    List {
        respond_to: Response<Vec<Canister>>,
    },
    Get {
        id: CanisterId,
        respond_to: Response<Canister>,
    },
    SetAgitator {
        id: CanisterId,
        on: bool,
        respond_to: Response<Canister>,
    },
    SetValve {
        id: CanisterId,
        open: bool,
        respond_to: Response<Canister>,
    },
    SetPump {
        id: CanisterId,
        direction: PumpDirection,
        respond_to: Response<Canister>,
    },
    EmergencyStopAll {
        respond_to: Response<EmergencyStopReport>,
    },
    ClearEmergency {
        respond_to: Response<bool>,
    },
    ApplyClamped {
        id: CanisterId,
        delta_ml: f64,
        respond_to: Response<LevelAdjustment>,
    },
    ApplyStrict {
        id: CanisterId,
        delta_ml: f64,
        respond_to: Response<LevelAdjustment>,
    },
    Compose {
        volumes: BTreeMap<CanisterId, f64>,
        respond_to: Response<DispenseFormula>,
    },
    Commit {
        formula: DispenseFormula,
        respond_to: Response<DispenseReceipt>,
    },
    Resize {
        new_count: u32,
        respond_to: Response<ResizeOutcome>,
    },
    Reconfigure {
        config: MachineConfig,
        respond_to: Response<ResizeOutcome>,
    },
    Status {
        respond_to: Response<MachineStatus>,
    },
    Summary {
        respond_to: Response<FillSummary>,
    },
}

impl ControlRequest {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::List { .. } => "list",
            ControlRequest::Get { .. } => "get",
            ControlRequest::SetAgitator { .. } => "set_agitator",
            ControlRequest::SetValve { .. } => "set_valve",
            ControlRequest::SetPump { .. } => "set_pump",
            ControlRequest::EmergencyStopAll { .. } => "emergency_stop_all",
            ControlRequest::ClearEmergency { .. } => "clear_emergency",
            ControlRequest::ApplyClamped { .. } => "apply_clamped",
            ControlRequest::ApplyStrict { .. } => "apply_strict",
            ControlRequest::Compose { .. } => "compose",
            ControlRequest::Commit { .. } => "commit",
            ControlRequest::Resize { .. } => "resize",
            ControlRequest::Reconfigure { .. } => "reconfigure",
            ControlRequest::Status { .. } => "status",
            ControlRequest::Summary { .. } => "summary",
        }
    }
}
