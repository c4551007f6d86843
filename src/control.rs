//! # Control Core
//!
//! Wires the registry, the actuator controller, the level engine and the
//! formula composer around one shared [`CanisterRegistry`], and exposes the
//! whole client API as plain async methods.
//!
//! `ControlCore` is what the mailbox actor drives; it can also be used
//! directly (behind an `Arc`) when no mailbox is wanted.

use crate::actuator::{ActuatorController, EmergencyLatch, EmergencyStopReport};
use crate::audit::AuditSink;
use crate::error::ControlResult;
use crate::formula::FormulaComposer;
use crate::hardware::{HardwareDriver, HardwareLink};
use crate::level::{LevelAdjustment, LevelAdjustmentEngine};
use crate::model::{
    ActuatorHealth, ActuatorKind, AuditDetails, AuditEvent, Canister, CanisterFill, CanisterId,
    DispenseFormula, DispenseReceipt, FillSummary, MachineConfig, MachineStatus, PumpDirection,
    RuntimeSettings,
};
use crate::registry::{CanisterRegistry, ResizeOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub struct ControlCore {
    registry: Arc<CanisterRegistry>,
    hardware: Arc<HardwareLink>,
    actuators: ActuatorController,
    levels: LevelAdjustmentEngine,
    formulas: FormulaComposer,
    audit: Arc<dyn AuditSink>,
}

impl ControlCore {
    /// Initializes the registry from `config` and wires every component.
    ///
    /// # Errors
    /// `ConfigInvalid` if the configuration is rejected by the registry.
    pub fn new(
        config: MachineConfig,
        runtime: &RuntimeSettings,
        driver: Arc<dyn HardwareDriver>,
        audit: Arc<dyn AuditSink>,
    ) -> ControlResult<Self> {
        let registry = Arc::new(CanisterRegistry::initialize(
            config,
            &runtime.level_seed,
            runtime.lock_timeout(),
        )?);
        let hardware = Arc::new(HardwareLink::new(driver, runtime.ack_timeout()));
        let latch = Arc::new(EmergencyLatch::new());

        let actuators = ActuatorController::new(registry.clone(), hardware.clone(), latch.clone(), audit.clone());
        let levels = LevelAdjustmentEngine::new(registry.clone(), audit.clone());
        let formulas = FormulaComposer::new(registry.clone(), latch, audit.clone());

        Ok(Self {
            registry,
            hardware,
            actuators,
            levels,
            formulas,
            audit,
        })
    }

    pub fn registry(&self) -> &Arc<CanisterRegistry> {
        &self.registry
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn list(&self) -> ControlResult<Vec<Canister>> {
        self.registry.list().await
    }

    pub async fn get(&self, id: CanisterId) -> ControlResult<Canister> {
        self.registry.get(id).await
    }

    pub async fn config(&self) -> MachineConfig {
        self.registry.config().await
    }

    pub fn health(&self, id: CanisterId, actuator: ActuatorKind) -> ActuatorHealth {
        self.hardware.health(id, actuator)
    }

    /// `Error` while latched or degraded, `Busy` while a commit is in
    /// flight, otherwise `Ready`.
    pub fn status(&self) -> MachineStatus {
        if self.actuators.is_emergency_active() || self.hardware.any_degraded() {
            MachineStatus::Error
        } else if self.formulas.in_flight() > 0 {
            MachineStatus::Busy
        } else {
            MachineStatus::Ready
        }
    }

    /// Dashboard figures over a consistent snapshot of every canister.
    pub async fn summary(&self) -> ControlResult<FillSummary> {
        let limits = self.registry.limits().await;
        let canisters = self.registry.list().await?;

        let average_level_ml = if canisters.is_empty() {
            0.0
        } else {
            canisters.iter().map(|c| c.level_ml).sum::<f64>() / canisters.len() as f64
        };
        let fills: Vec<CanisterFill> = canisters
            .iter()
            .map(|c| CanisterFill {
                id: c.id,
                code: c.code.clone(),
                level_ml: c.level_ml,
                fill_percent: c.fill_percent(limits.max_level_ml),
                below_reserve: c.is_below_reserve(limits.reserve_level_ml),
            })
            .collect();
        let low_stock = fills.iter().filter(|f| f.below_reserve).map(|f| f.id).collect();

        Ok(FillSummary {
            status: self.status(),
            canister_count: canisters.len(),
            average_level_ml,
            max_level_ml: limits.max_level_ml,
            reserve_level_ml: limits.reserve_level_ml,
            canisters: fills,
            low_stock,
        })
    }

    // =========================================================================
    // Actuators
    // =========================================================================

    pub async fn set_agitator(&self, id: CanisterId, on: bool) -> ControlResult<Canister> {
        self.actuators.set_agitator(id, on).await
    }

    pub async fn set_valve(&self, id: CanisterId, open: bool) -> ControlResult<Canister> {
        self.actuators.set_valve(id, open).await
    }

    pub async fn set_pump(&self, id: CanisterId, direction: PumpDirection) -> ControlResult<Canister> {
        self.actuators.set_pump(id, direction).await
    }

    pub async fn emergency_stop_all(&self) -> ControlResult<EmergencyStopReport> {
        self.actuators.emergency_stop_all().await
    }

    pub fn clear_emergency(&self) -> bool {
        self.actuators.clear_emergency()
    }

    pub fn is_emergency_active(&self) -> bool {
        self.actuators.is_emergency_active()
    }

    // =========================================================================
    // Levels and formulas
    // =========================================================================

    pub async fn apply_clamped(&self, id: CanisterId, delta_ml: f64) -> ControlResult<LevelAdjustment> {
        self.levels.apply_clamped(id, delta_ml).await
    }

    pub async fn apply_strict(&self, id: CanisterId, delta_ml: f64) -> ControlResult<LevelAdjustment> {
        self.levels.apply_strict(id, delta_ml).await
    }

    pub async fn compose(&self, requested: BTreeMap<CanisterId, f64>) -> ControlResult<DispenseFormula> {
        self.formulas.compose(requested).await
    }

    pub async fn commit(&self, formula: &DispenseFormula) -> ControlResult<DispenseReceipt> {
        self.formulas.commit(formula).await
    }

    // =========================================================================
    // Reconfiguration
    // =========================================================================

    pub async fn resize(&self, new_count: u32) -> ControlResult<ResizeOutcome> {
        let outcome = self.registry.resize(new_count).await?;
        self.canister_set_changed(&outcome).await;
        Ok(outcome)
    }

    pub async fn reconfigure(&self, config: MachineConfig) -> ControlResult<ResizeOutcome> {
        let outcome = self.registry.reconfigure(config).await?;
        self.canister_set_changed(&outcome).await;
        Ok(outcome)
    }

    async fn canister_set_changed(&self, outcome: &ResizeOutcome) {
        self.hardware.forget(&outcome.removed);
        let limits = self.registry.limits().await;
        info!(added = ?outcome.added, removed = ?outcome.removed, "Machine reconfigured");
        self.audit.emit(AuditEvent::now(
            None,
            AuditDetails::CanisterSet {
                added: outcome.added.clone(),
                removed: outcome.removed.clone(),
                max_level_ml: limits.max_level_ml,
                reserve_level_ml: limits.reserve_level_ml,
            },
        ));
    }
}
