//! # Level Adjustment Engine
//!
//! Bounded volume changes on a single canister, in two modes:
//!
//! - **Clamped** (manual refill and drain): the new level is clamped into
//!   `[0, max_level]` and the caller is told how much was actually applied.
//! - **Strict** (dispensing): the change must land inside the bounds exactly
//!   or nothing happens. A formula has to be delivered at its composed ratio;
//!   clamping one ingredient would change the color.
//!
//! Both emit `LevelAdjusted` when the level moves and `ReserveAlert` when it
//! falls below the reserve level from at or above it.

use crate::audit::AuditSink;
use crate::error::{ControlError, ControlResult};
use crate::model::{AuditDetails, AuditEvent, Canister, CanisterId, Limits};
use crate::registry::{CanisterRegistry, Transition};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one level change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelAdjustment {
    pub canister_id: CanisterId,
    pub requested_ml: f64,
    /// Equal to `requested_ml` unless `clamped`.
    pub applied_ml: f64,
    pub level_ml: f64,
    pub clamped: bool,
}

/// Level after applying `delta_ml` exactly.
///
/// # Errors
/// `Capacity` if the result leaves `[0, max_level]`.
pub fn strict_transition(canister: &Canister, delta_ml: f64, limits: &Limits) -> ControlResult<Canister> {
    let target = canister.level_ml + delta_ml;
    if !limits.contains(target) {
        return Err(ControlError::Capacity {
            canister_id: canister.id,
            level_ml: canister.level_ml,
            delta_ml,
            max_level_ml: limits.max_level_ml,
        });
    }
    Ok(Canister {
        level_ml: target,
        ..canister.clone()
    })
}

/// True when a level moved from at-or-above the reserve to below it.
pub(crate) fn crossed_reserve(before_ml: f64, after_ml: f64, reserve_ml: f64) -> bool {
    before_ml >= reserve_ml && after_ml < reserve_ml
}

pub struct LevelAdjustmentEngine {
    registry: Arc<CanisterRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl LevelAdjustmentEngine {
    pub fn new(registry: Arc<CanisterRegistry>, audit: Arc<dyn AuditSink>) -> Self {
        Self { registry, audit }
    }

    /// Adds `delta_ml`, clamping the result into `[0, max_level]`.
    ///
    /// Always succeeds for a known canister and a finite delta. A zero delta
    /// changes nothing and emits nothing.
    pub async fn apply_clamped(&self, id: CanisterId, delta_ml: f64) -> ControlResult<LevelAdjustment> {
        ensure_finite(id, delta_ml)?;

        let transition = self
            .registry
            .atomic_update(id, |c, limits| {
                Ok(Canister {
                    level_ml: (c.level_ml + delta_ml).clamp(0.0, limits.max_level_ml),
                    ..c.clone()
                })
            })
            .await?;
        let limits = transition.limits;

        let unclamped = transition.before.level_ml + delta_ml;
        let clamped = !limits.contains(unclamped);
        let applied_ml = if clamped {
            transition.after.level_ml - transition.before.level_ml
        } else {
            delta_ml
        };
        if clamped {
            warn!(canister = %id, requested_ml = delta_ml, applied_ml, "Level adjustment clamped");
        }

        Ok(self.record(&transition, delta_ml, applied_ml, clamped))
    }

    /// Adds `delta_ml` exactly.
    ///
    /// # Errors
    /// `Capacity` if the result would leave `[0, max_level]`; the canister is
    /// unchanged.
    pub async fn apply_strict(&self, id: CanisterId, delta_ml: f64) -> ControlResult<LevelAdjustment> {
        ensure_finite(id, delta_ml)?;

        let transition = self
            .registry
            .atomic_update(id, |c, limits| strict_transition(c, delta_ml, limits))
            .await
            .inspect_err(|e| warn!(canister = %id, delta_ml, error = %e, "Strict adjustment rejected"))?;

        Ok(self.record(&transition, delta_ml, delta_ml, false))
    }

    fn record(
        &self,
        transition: &Transition,
        requested_ml: f64,
        applied_ml: f64,
        clamped: bool,
    ) -> LevelAdjustment {
        let id = transition.id();
        let limits = &transition.limits;
        let level_ml = transition.after.level_ml;

        if transition.changed() {
            info!(canister = %id, applied_ml, level_ml, "Level adjusted");
            self.audit.emit(AuditEvent::now(
                Some(id),
                AuditDetails::Level {
                    requested_ml,
                    applied_ml,
                    level_ml,
                },
            ));
        }
        if crossed_reserve(transition.before.level_ml, level_ml, limits.reserve_level_ml) {
            warn!(canister = %id, level_ml, "Canister below reserve level");
            self.audit.emit(AuditEvent::now(
                Some(id),
                AuditDetails::Reserve {
                    level_ml,
                    reserve_level_ml: limits.reserve_level_ml,
                },
            ));
        }

        LevelAdjustment {
            canister_id: id,
            requested_ml,
            applied_ml,
            level_ml,
            clamped,
        }
    }
}

fn ensure_finite(id: CanisterId, delta_ml: f64) -> ControlResult<()> {
    if delta_ml.is_finite() {
        Ok(())
    } else {
        Err(ControlError::Validation(format!(
            "volume change for {} must be a finite number, got {}",
            id, delta_ml
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::model::{AuditEventKind, LevelSeed, MachineConfig};
    use std::time::Duration;

    fn engine(levels: Vec<f64>) -> (LevelAdjustmentEngine, MemoryAuditSink) {
        let config = MachineConfig::with_limits(levels.len() as u32, 3000.0, 250.0);
        let registry = Arc::new(
            CanisterRegistry::initialize(config, &LevelSeed::Explicit(levels), Duration::from_millis(100))
                .unwrap(),
        );
        let audit = MemoryAuditSink::new();
        (LevelAdjustmentEngine::new(registry, Arc::new(audit.clone())), audit)
    }

    #[tokio::test]
    async fn clamped_refill_reports_truncation() {
        let (engine, _) = engine(vec![2800.0]);
        let adjustment = engine.apply_clamped(CanisterId(1), 500.0).await.unwrap();
        assert!(adjustment.clamped);
        assert_eq!(adjustment.applied_ml, 200.0);
        assert_eq!(adjustment.level_ml, 3000.0);
    }

    #[tokio::test]
    async fn clamped_drain_stops_at_empty() {
        let (engine, _) = engine(vec![100.0]);
        let adjustment = engine.apply_clamped(CanisterId(1), -400.0).await.unwrap();
        assert!(adjustment.clamped);
        assert_eq!(adjustment.applied_ml, -100.0);
        assert_eq!(adjustment.level_ml, 0.0);
    }

    #[tokio::test]
    async fn zero_delta_is_idempotent_and_silent() {
        let (engine, audit) = engine(vec![750.0]);
        for _ in 0..3 {
            let adjustment = engine.apply_clamped(CanisterId(1), 0.0).await.unwrap();
            assert!(!adjustment.clamped);
            assert_eq!(adjustment.applied_ml, 0.0);
            assert_eq!(adjustment.level_ml, 750.0);
        }
        assert!(audit.events().is_empty());
    }

    #[tokio::test]
    async fn nan_delta_is_a_validation_error() {
        let (engine, _) = engine(vec![750.0]);
        assert!(matches!(
            engine.apply_clamped(CanisterId(1), f64::NAN).await,
            Err(ControlError::Validation(_))
        ));
        assert!(matches!(
            engine.apply_strict(CanisterId(1), f64::INFINITY).await,
            Err(ControlError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn strict_overdraw_fails_without_change() {
        let (engine, audit) = engine(vec![300.0]);
        let result = engine.apply_strict(CanisterId(1), -301.0).await;
        assert!(matches!(result, Err(ControlError::Capacity { .. })));

        let adjustment = engine.apply_clamped(CanisterId(1), 0.0).await.unwrap();
        assert_eq!(adjustment.level_ml, 300.0);
        assert!(audit.events().is_empty());
    }

    #[tokio::test]
    async fn crossing_the_reserve_emits_one_alert() {
        let (engine, audit) = engine(vec![300.0]);
        engine.apply_strict(CanisterId(1), -100.0).await.unwrap();
        engine.apply_strict(CanisterId(1), -50.0).await.unwrap();

        let alerts = audit.events_of(AuditEventKind::ReserveAlert);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].canister_id, Some(CanisterId(1)));
        assert_eq!(audit.events_of(AuditEventKind::LevelAdjusted).len(), 2);
    }

    #[tokio::test]
    async fn limits_are_read_once_the_canister_is_locked() {
        let config = MachineConfig::with_limits(1, 3000.0, 250.0);
        let registry = Arc::new(
            CanisterRegistry::initialize(config, &LevelSeed::Explicit(vec![1000.0]), Duration::from_secs(1))
                .unwrap(),
        );
        let audit = MemoryAuditSink::new();
        let engine = Arc::new(LevelAdjustmentEngine::new(registry.clone(), Arc::new(audit.clone())));

        // Raising the limits does not need the canister lock, so they can
        // change while an adjustment is queued on it.
        let held = registry.lock_many(&[CanisterId(1)]).await.unwrap();
        let refill = tokio::spawn({
            let engine = engine.clone();
            async move { engine.apply_clamped(CanisterId(1), 5000.0).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry
            .reconfigure(MachineConfig::with_limits(1, 4000.0, 2000.0))
            .await
            .unwrap();
        drop(held);

        let adjustment = refill.await.unwrap().unwrap();
        assert!(adjustment.clamped);
        assert_eq!(adjustment.level_ml, 4000.0);
        assert_eq!(adjustment.applied_ml, 3000.0);

        let held = registry.lock_many(&[CanisterId(1)]).await.unwrap();
        let drain = tokio::spawn({
            let engine = engine.clone();
            async move { engine.apply_strict(CanisterId(1), -1500.0).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry
            .reconfigure(MachineConfig::with_limits(1, 4000.0, 3000.0))
            .await
            .unwrap();
        drop(held);

        assert_eq!(drain.await.unwrap().unwrap().level_ml, 2500.0);
        let alerts = audit.events_of(AuditEventKind::ReserveAlert);
        assert_eq!(alerts.len(), 1);
        assert!(matches!(
            alerts[0].details,
            AuditDetails::Reserve { reserve_level_ml, .. } if reserve_level_ml == 3000.0
        ));
    }

    #[test]
    fn strict_transition_allows_exact_bounds() {
        let limits = Limits {
            max_level_ml: 3000.0,
            reserve_level_ml: 250.0,
        };
        let canister = Canister::new(CanisterId(1), 500.0);
        assert_eq!(strict_transition(&canister, -500.0, &limits).unwrap().level_ml, 0.0);
        assert_eq!(strict_transition(&canister, 2500.0, &limits).unwrap().level_ml, 3000.0);
        assert!(strict_transition(&canister, 2500.5, &limits).is_err());
    }
}
