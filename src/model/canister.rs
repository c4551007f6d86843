//! Canister records: one colorant slot of the terminal.
//!
//! # Registry Ownership
//! A `Canister` value is always a *snapshot*. The live record sits behind the
//! per-canister lock inside [`CanisterRegistry`](crate::registry::CanisterRegistry)
//! and is only ever replaced wholesale by a validated transition.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Display colors of the factory-fitted colorant set, by slot.
const PALETTE: [&str; 16] = [
    "#000000", "#FFFFFF", "#FF0000", "#0000FF", "#FFFF00", "#008000", "#FFA500", "#800080",
    "#A52A2A", "#808080", "#FFC0CB", "#00FFFF", "#F0E68C", "#E6E6FA", "#000080", "#556B2F",
];

const UNASSIGNED_COLOR: &str = "#CCCCCC";

/// Type-safe identifier for canisters (1-based slot number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanisterId(pub u32);

impl From<u32> for CanisterId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl Display for CanisterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "canister_{}", self.0)
    }
}

/// Pump drive state. `Up` and `Down` must always be separated by `Off`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PumpDirection {
    #[default]
    Off,
    Up,
    Down,
}

impl PumpDirection {
    /// True when going from `self` to `next` would reverse a running pump.
    pub fn reverses_into(self, next: PumpDirection) -> bool {
        matches!(
            (self, next),
            (PumpDirection::Up, PumpDirection::Down) | (PumpDirection::Down, PumpDirection::Up)
        )
    }
}

impl Display for PumpDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PumpDirection::Off => "OFF",
            PumpDirection::Up => "UP",
            PumpDirection::Down => "DOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canister {
    pub id: CanisterId,
    pub code: String,
    pub color: String,
    pub level_ml: f64,
    pub agitator_on: bool,
    pub valve_open: bool,
    pub pump: PumpDirection,
}

impl Canister {
    /// Creates a canister with every actuator off.
    ///
    /// # Arguments
    /// * `id` - Slot number, also used to derive the `C-NN` code and palette color
    /// * `level_ml` - Initial fill level (the caller is responsible for bounds)
    pub fn new(id: CanisterId, level_ml: f64) -> Self {
        let color = usize::try_from(id.0.saturating_sub(1))
            .ok()
            .and_then(|slot| PALETTE.get(slot))
            .copied()
            .unwrap_or(UNASSIGNED_COLOR);
        Self {
            id,
            code: format!("C-{:02}", id.0),
            color: color.to_string(),
            level_ml,
            agitator_on: false,
            valve_open: false,
            pump: PumpDirection::Off,
        }
    }

    /// Copy of this canister with agitator, valve and pump all off.
    pub fn safe_state(&self) -> Self {
        Self {
            agitator_on: false,
            valve_open: false,
            pump: PumpDirection::Off,
            ..self.clone()
        }
    }

    pub fn is_safe(&self) -> bool {
        !self.agitator_on && !self.valve_open && self.pump == PumpDirection::Off
    }

    /// Fill percentage against the machine maximum.
    pub fn fill_percent(&self, max_level_ml: f64) -> f64 {
        if max_level_ml <= 0.0 {
            return 0.0;
        }
        self.level_ml / max_level_ml * 100.0
    }

    pub fn is_below_reserve(&self, reserve_level_ml: f64) -> bool {
        self.level_ml < reserve_level_ml
    }
}
