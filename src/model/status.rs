//! Machine-level read models: status and the dashboard fill summary.

use crate::model::CanisterId;
use serde::Serialize;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MachineStatus {
    Ready,
    /// At least one formula commit is in flight.
    Busy,
    /// Emergency latch engaged or an actuator is degraded.
    Error,
}

impl Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MachineStatus::Ready => "READY",
            MachineStatus::Busy => "BUSY",
            MachineStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanisterFill {
    pub id: CanisterId,
    pub code: String,
    pub level_ml: f64,
    pub fill_percent: f64,
    pub below_reserve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FillSummary {
    pub status: MachineStatus,
    pub canister_count: usize,
    pub average_level_ml: f64,
    pub max_level_ml: f64,
    pub reserve_level_ml: f64,
    pub canisters: Vec<CanisterFill>,
    pub low_stock: Vec<CanisterId>,
}
