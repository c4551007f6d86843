//! Actuator commands as sent to the hardware driver.

use crate::model::PumpDirection;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The three actuators fitted to every canister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActuatorKind {
    Agitator,
    Valve,
    Pump,
}

impl Display for ActuatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActuatorKind::Agitator => "agitator",
            ActuatorKind::Valve => "valve",
            ActuatorKind::Pump => "pump",
        };
        f.write_str(name)
    }
}

/// A single command for one canister's actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorCommand {
    Agitator(bool),
    Valve(bool),
    Pump(PumpDirection),
    /// Agitator off, valve closed, pump off in one frame.
    SafeState,
}

impl ActuatorCommand {
    /// Actuators whose health depends on this command's acknowledgment.
    pub fn actuators(&self) -> &'static [ActuatorKind] {
        match self {
            ActuatorCommand::Agitator(_) => &[ActuatorKind::Agitator],
            ActuatorCommand::Valve(_) => &[ActuatorKind::Valve],
            ActuatorCommand::Pump(_) => &[ActuatorKind::Pump],
            ActuatorCommand::SafeState => &[
                ActuatorKind::Agitator,
                ActuatorKind::Valve,
                ActuatorKind::Pump,
            ],
        }
    }
}

/// Health of one actuator as seen through driver acknowledgments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorHealth {
    #[default]
    Nominal,
    /// The last command went unacknowledged after its retry, or faulted.
    Degraded,
}
