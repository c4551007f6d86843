use std::collections::BTreeMap;
use std::sync::Arc;
use tint_control::audit::MemoryAuditSink;
use tint_control::config::StaticConfigStore;
use tint_control::error::{ControlError, Shortfall};
use tint_control::hardware::MockDriver;
use tint_control::lifecycle::TintingTerminal;
use tint_control::model::{
    ActuatorCommand, AuditDetails, AuditEventKind, CanisterId, LevelSeed, MachineConfig, MachineStatus,
    PumpDirection, RuntimeSettings,
};

fn two_canister_store() -> StaticConfigStore {
    StaticConfigStore::new(MachineConfig::with_limits(2, 3000.0, 250.0)).with_runtime(RuntimeSettings {
        level_seed: LevelSeed::Explicit(vec![500.0, 500.0]),
        ..RuntimeSettings::default()
    })
}

fn start(store: &StaticConfigStore) -> (TintingTerminal, Arc<MockDriver>, MemoryAuditSink) {
    let driver = Arc::new(MockDriver::permissive());
    let audit = MemoryAuditSink::new();
    let terminal =
        TintingTerminal::start(store, driver.clone(), Arc::new(audit.clone())).expect("Failed to start terminal");
    (terminal, driver, audit)
}

fn volumes(entries: &[(u32, f64)]) -> BTreeMap<CanisterId, f64> {
    entries.iter().map(|&(id, ml)| (CanisterId(id), ml)).collect()
}

/// Full end-to-end test of a dispense that falls short, then one that succeeds.
#[tokio::test]
async fn test_dispense_shortfall_then_commit() {
    let store = two_canister_store();
    let (terminal, _driver, audit) = start(&store);
    let client = terminal.client();

    // Canister 2 only holds 500 ml
    let result = client.dispense(volumes(&[(1, 200.0), (2, 600.0)])).await;
    match result {
        Err(ControlError::InsufficientVolume { shortfalls }) => {
            assert_eq!(
                shortfalls,
                vec![Shortfall {
                    canister_id: CanisterId(2),
                    requested_ml: 600.0,
                    available_ml: 500.0,
                    shortfall_ml: 100.0,
                }]
            );
        }
        other => panic!("Expected InsufficientVolume, got {:?}", other),
    }

    // Nothing was withdrawn, not even from canister 1
    let levels: Vec<f64> = client
        .list()
        .await
        .expect("Failed to list")
        .iter()
        .map(|c| c.level_ml)
        .collect();
    assert_eq!(levels, vec![500.0, 500.0]);
    assert_eq!(audit.events_of(AuditEventKind::FormulaAborted).len(), 1);
    assert!(audit.events_of(AuditEventKind::FormulaCommitted).is_empty());

    let receipt = client
        .dispense(volumes(&[(1, 200.0), (2, 300.0)]))
        .await
        .expect("Dispense should succeed");
    assert_eq!(receipt.total_ml, 500.0);
    assert_eq!(receipt.level_of(CanisterId(1)), Some(300.0));
    assert_eq!(receipt.level_of(CanisterId(2)), Some(200.0));
    assert_eq!(receipt.reserve_alerts, vec![CanisterId(2)]);

    let alerts = audit.events_of(AuditEventKind::ReserveAlert);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].canister_id, Some(CanisterId(2)));
    assert_eq!(audit.events_of(AuditEventKind::FormulaCommitted).len(), 1);

    let summary = client.summary().await.expect("Failed to get summary");
    assert_eq!(summary.low_stock, vec![CanisterId(2)]);
    assert_eq!(summary.average_level_ml, 250.0);
    assert_eq!(summary.status, MachineStatus::Ready);

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_compose_rejects_bad_formulas() {
    let store = two_canister_store();
    let (terminal, _driver, _audit) = start(&store);
    let client = terminal.client();

    assert_eq!(
        client.compose(volumes(&[(1, 0.0), (2, 0.0)])).await,
        Err(ControlError::EmptyFormula)
    );
    assert!(matches!(
        client.compose(volumes(&[(1, -5.0)])).await,
        Err(ControlError::Validation(_))
    ));
    assert!(matches!(
        client.compose(volumes(&[(9, 5.0)])).await,
        Err(ControlError::Validation(_))
    ));

    // Zero entries are dropped rather than rejected
    let formula = client
        .compose(volumes(&[(1, 10.0), (2, 0.0)]))
        .await
        .expect("Compose should succeed");
    assert_eq!(formula.canister_ids(), vec![CanisterId(1)]);

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_pump_interlock_through_client() {
    let store = two_canister_store();
    let (terminal, driver, audit) = start(&store);
    let client = terminal.client();
    let id = CanisterId(1);

    client.set_pump(id, PumpDirection::Up).await.expect("Pump up failed");
    let refused = client.set_pump(id, PumpDirection::Down).await;
    assert_eq!(
        refused,
        Err(ControlError::UnsafeTransition {
            canister_id: id,
            from: PumpDirection::Up,
            to: PumpDirection::Down,
        })
    );
    assert_eq!(client.get(id).await.expect("Get failed").pump, PumpDirection::Up);

    client.set_pump(id, PumpDirection::Off).await.expect("Pump off failed");
    let canister = client.set_pump(id, PumpDirection::Down).await.expect("Pump down failed");
    assert_eq!(canister.pump, PumpDirection::Down);

    // The rejected reversal never reached the hardware
    assert_eq!(
        driver.received(),
        vec![
            (id, ActuatorCommand::Pump(PumpDirection::Up)),
            (id, ActuatorCommand::Pump(PumpDirection::Off)),
            (id, ActuatorCommand::Pump(PumpDirection::Down)),
        ]
    );
    assert_eq!(audit.events_of(AuditEventKind::ActuatorChanged).len(), 3);

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_emergency_stop_blocks_commits_until_cleared() {
    let store = two_canister_store();
    let (terminal, _driver, audit) = start(&store);
    let client = terminal.client();

    client.set_agitator(CanisterId(1), true).await.expect("Agitator failed");
    client.set_valve(CanisterId(2), true).await.expect("Valve failed");
    client.set_pump(CanisterId(2), PumpDirection::Up).await.expect("Pump failed");

    let report = client.emergency_stop_all().await.expect("Emergency stop failed");
    assert!(report.newly_engaged);
    assert!(report.hardware_failures.is_empty());
    assert!(report.canisters.iter().all(|c| c.is_safe()));
    assert_eq!(client.status().await, Ok(MachineStatus::Error));

    // A second stop is harmless
    let again = client.emergency_stop_all().await.expect("Second stop failed");
    assert!(!again.newly_engaged);

    assert_eq!(
        client.dispense(volumes(&[(1, 50.0)])).await,
        Err(ControlError::EmergencyStopActive)
    );
    assert_eq!(client.get(CanisterId(1)).await.map(|c| c.level_ml), Ok(500.0));

    assert_eq!(client.clear_emergency().await, Ok(true));
    assert_eq!(client.clear_emergency().await, Ok(false));
    assert_eq!(client.status().await, Ok(MachineStatus::Ready));

    let receipt = client
        .dispense(volumes(&[(1, 50.0)]))
        .await
        .expect("Dispense after clear failed");
    assert_eq!(receipt.level_of(CanisterId(1)), Some(450.0));

    let stops = audit.events_of(AuditEventKind::EmergencyStop);
    assert_eq!(stops.len(), 3);
    assert!(matches!(stops[2].details, AuditDetails::EmergencyStop { engaged: false, .. }));

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_level_adjustments_through_client() {
    let store = two_canister_store();
    let (terminal, _driver, audit) = start(&store);
    let client = terminal.client();

    let refill = client
        .apply_clamped(CanisterId(1), 5000.0)
        .await
        .expect("Clamped refill failed");
    assert!(refill.clamped);
    assert_eq!(refill.level_ml, 3000.0);
    assert_eq!(refill.applied_ml, 2500.0);

    let unchanged = client.apply_clamped(CanisterId(1), 0.0).await.expect("Zero delta failed");
    assert!(!unchanged.clamped);
    assert_eq!(unchanged.level_ml, 3000.0);
    assert_eq!(audit.events_of(AuditEventKind::LevelAdjusted).len(), 1);

    let over = client.apply_strict(CanisterId(2), -600.0).await;
    assert!(matches!(over, Err(ControlError::Capacity { .. })));
    assert_eq!(client.get(CanisterId(2)).await.map(|c| c.level_ml), Ok(500.0));

    let strict = client.apply_strict(CanisterId(2), -300.0).await.expect("Strict failed");
    assert_eq!(strict.level_ml, 200.0);
    assert_eq!(audit.events_of(AuditEventKind::ReserveAlert).len(), 1);

    assert_eq!(
        client.apply_clamped(CanisterId(7), 1.0).await,
        Err(ControlError::CanisterNotFound(CanisterId(7)))
    );

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_reload_config_grows_and_shrinks() {
    let store = two_canister_store();
    let (terminal, _driver, _audit) = start(&store);
    let client = terminal.client();

    store.replace(MachineConfig::with_limits(3, 3000.0, 250.0));
    let grown = terminal.reload_config(&store).await.expect("Reload failed");
    assert_eq!(grown.added, vec![CanisterId(3)]);
    assert!(grown.removed.is_empty());
    assert_eq!(client.get(CanisterId(3)).await.map(|c| c.level_ml), Ok(0.0));

    store.replace(MachineConfig::with_limits(1, 3000.0, 250.0));
    let shrunk = terminal.reload_config(&store).await.expect("Reload failed");
    assert_eq!(shrunk.removed, vec![CanisterId(2), CanisterId(3)]);
    assert_eq!(client.list().await.map(|all| all.len()), Ok(1));
    assert_eq!(
        client.get(CanisterId(2)).await,
        Err(ControlError::CanisterNotFound(CanisterId(2)))
    );

    // Canister 1 holds 500 ml, so a 400 ml maximum is refused
    store.replace(MachineConfig::with_limits(1, 400.0, 100.0));
    assert!(matches!(
        terminal.reload_config(&store).await,
        Err(ControlError::ConfigInvalid(_))
    ));
    assert_eq!(terminal.core().config().await.max_level_ml, 3000.0);

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let store = StaticConfigStore::new(MachineConfig::with_limits(0, 3000.0, 250.0));
    let result = TintingTerminal::start(
        &store,
        Arc::new(MockDriver::permissive()),
        Arc::new(MemoryAuditSink::new()),
    );
    assert!(matches!(result, Err(ControlError::ConfigInvalid(_))));
}
