//! Audit events emitted to the external [`AuditSink`](crate::audit::AuditSink).

use crate::model::{ActuatorCommand, CanisterId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuditEventKind {
    ActuatorChanged,
    LevelAdjusted,
    FormulaCommitted,
    FormulaAborted,
    ReserveAlert,
    EmergencyStop,
    CanisterSetChanged,
}

/// Kind-specific payload of an [`AuditEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AuditDetails {
    Actuator {
        command: ActuatorCommand,
    },
    Level {
        requested_ml: f64,
        applied_ml: f64,
        level_ml: f64,
    },
    FormulaCommitted {
        dispensed: BTreeMap<CanisterId, f64>,
        total_ml: f64,
    },
    FormulaAborted {
        canisters: Vec<CanisterId>,
        reason: String,
    },
    Reserve {
        level_ml: f64,
        reserve_level_ml: f64,
    },
    /// `engaged` is false for the event recorded by `clear_emergency`.
    EmergencyStop {
        engaged: bool,
        canisters: usize,
    },
    /// A resize or reconfiguration, with the limits in force afterwards.
    CanisterSet {
        added: Vec<CanisterId>,
        removed: Vec<CanisterId>,
        max_level_ml: f64,
        reserve_level_ml: f64,
    },
}

impl AuditDetails {
    pub fn kind(&self) -> AuditEventKind {
        match self {
            AuditDetails::Actuator { .. } => AuditEventKind::ActuatorChanged,
            AuditDetails::Level { .. } => AuditEventKind::LevelAdjusted,
            AuditDetails::FormulaCommitted { .. } => AuditEventKind::FormulaCommitted,
            AuditDetails::FormulaAborted { .. } => AuditEventKind::FormulaAborted,
            AuditDetails::Reserve { .. } => AuditEventKind::ReserveAlert,
            AuditDetails::EmergencyStop { .. } => AuditEventKind::EmergencyStop,
            AuditDetails::CanisterSet { .. } => AuditEventKind::CanisterSetChanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub canister_id: Option<CanisterId>,
    pub timestamp: DateTime<Utc>,
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Stamps `details` with the current time; the kind follows the payload.
    pub fn now(canister_id: Option<CanisterId>, details: AuditDetails) -> Self {
        Self {
            kind: details.kind(),
            canister_id,
            timestamp: Utc::now(),
            details,
        }
    }
}
