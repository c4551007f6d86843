use std::sync::Arc;
use tint_control::audit::MemoryAuditSink;
use tint_control::config::StaticConfigStore;
use tint_control::error::ControlError;
use tint_control::hardware::MockDriver;
use tint_control::lifecycle::TintingTerminal;
use tint_control::model::{
    ActuatorCommand, ActuatorHealth, ActuatorKind, CanisterId, LevelSeed, MachineConfig, MachineStatus,
    PumpDirection, RuntimeSettings,
};

fn start_with(driver: &Arc<MockDriver>, canisters: u32) -> TintingTerminal {
    let store =
        StaticConfigStore::new(MachineConfig::with_limits(canisters, 3000.0, 250.0)).with_runtime(RuntimeSettings {
            level_seed: LevelSeed::Uniform(1000.0),
            ack_timeout_ms: 25,
            ..RuntimeSettings::default()
        });
    TintingTerminal::start(&store, driver.clone(), Arc::new(MemoryAuditSink::new()))
        .expect("Failed to start terminal")
}

#[tokio::test]
async fn test_single_missed_ack_is_retried() {
    let driver = Arc::new(MockDriver::new());
    let id = CanisterId(1);
    driver.expect_command(id, ActuatorCommand::Valve(true)).hang();
    driver.expect_command(id, ActuatorCommand::Valve(true)).return_ack();

    let terminal = start_with(&driver, 1);
    let client = terminal.client();

    let canister = client.set_valve(id, true).await.expect("Retry should succeed");
    assert!(canister.valve_open);
    assert_eq!(terminal.core().health(id, ActuatorKind::Valve), ActuatorHealth::Nominal);
    assert_eq!(client.status().await, Ok(MachineStatus::Ready));
    driver.verify();

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_two_missed_acks_degrade_the_actuator() {
    let driver = Arc::new(MockDriver::new());
    let id = CanisterId(1);
    driver.expect_command(id, ActuatorCommand::Pump(PumpDirection::Up)).return_timeout();
    driver.expect_command(id, ActuatorCommand::Pump(PumpDirection::Up)).hang();

    let terminal = start_with(&driver, 1);
    let client = terminal.client();

    assert_eq!(
        client.set_pump(id, PumpDirection::Up).await,
        Err(ControlError::HardwareTimeout {
            canister_id: id,
            command: ActuatorCommand::Pump(PumpDirection::Up),
        })
    );
    // The commanded state stands; only the hardware is in doubt
    assert_eq!(client.get(id).await.map(|c| c.pump), Ok(PumpDirection::Up));
    assert_eq!(terminal.core().health(id, ActuatorKind::Pump), ActuatorHealth::Degraded);
    assert_eq!(terminal.core().health(id, ActuatorKind::Valve), ActuatorHealth::Nominal);
    assert_eq!(client.status().await, Ok(MachineStatus::Error));
    driver.verify();

    // Re-issuing the same command goes back to the driver and recovers
    driver.expect_command(id, ActuatorCommand::Pump(PumpDirection::Up)).return_ack();
    client.set_pump(id, PumpDirection::Up).await.expect("Re-issue failed");
    assert_eq!(terminal.core().health(id, ActuatorKind::Pump), ActuatorHealth::Nominal);
    assert_eq!(client.status().await, Ok(MachineStatus::Ready));
    driver.verify();

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_fault_is_reported_without_retry() {
    let driver = Arc::new(MockDriver::new());
    let id = CanisterId(2);
    driver
        .expect_command(id, ActuatorCommand::Agitator(true))
        .return_fault("motor stalled");

    let terminal = start_with(&driver, 2);
    let client = terminal.client();

    match client.set_agitator(id, true).await {
        Err(ControlError::HardwareFault { canister_id, reason, .. }) => {
            assert_eq!(canister_id, id);
            assert_eq!(reason, "motor stalled");
        }
        other => panic!("Expected HardwareFault, got {:?}", other),
    }
    assert_eq!(driver.received().len(), 1);
    assert_eq!(terminal.core().health(id, ActuatorKind::Agitator), ActuatorHealth::Degraded);
    driver.verify();

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_emergency_stop_reports_unacknowledged_canisters() {
    let driver = Arc::new(MockDriver::new());
    driver.expect_command(CanisterId(1), ActuatorCommand::SafeState).return_ack();
    driver.expect_command(CanisterId(2), ActuatorCommand::SafeState).hang();
    driver.expect_command(CanisterId(2), ActuatorCommand::SafeState).hang();
    driver.expect_command(CanisterId(3), ActuatorCommand::SafeState).return_ack();

    let terminal = start_with(&driver, 3);
    let client = terminal.client();

    let report = client.emergency_stop_all().await.expect("Emergency stop must not fail");
    assert!(report.newly_engaged);
    assert_eq!(report.canisters.len(), 3);
    assert_eq!(
        report.hardware_failures,
        vec![ControlError::HardwareTimeout {
            canister_id: CanisterId(2),
            command: ActuatorCommand::SafeState,
        }]
    );
    assert!(client.list().await.expect("List failed").iter().all(|c| c.is_safe()));

    let core = terminal.core();
    for actuator in [ActuatorKind::Agitator, ActuatorKind::Valve, ActuatorKind::Pump] {
        assert_eq!(core.health(CanisterId(2), actuator), ActuatorHealth::Degraded);
        assert_eq!(core.health(CanisterId(1), actuator), ActuatorHealth::Nominal);
    }
    driver.verify();

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_removed_canister_health_is_forgotten() {
    let driver = Arc::new(MockDriver::new());
    driver.expect_command(CanisterId(2), ActuatorCommand::Valve(true)).return_fault("jammed");

    let terminal = start_with(&driver, 2);
    let client = terminal.client();

    assert!(client.set_valve(CanisterId(2), true).await.is_err());
    assert_eq!(client.status().await, Ok(MachineStatus::Error));

    let outcome = client.resize(1).await.expect("Resize failed");
    assert_eq!(outcome.removed, vec![CanisterId(2)]);
    assert_eq!(client.status().await, Ok(MachineStatus::Ready));
    driver.verify();

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

#[tokio::test]
async fn test_emergency_stop_overrides_a_pending_pump_command() {
    let driver = Arc::new(MockDriver::new());
    let id = CanisterId(1);
    driver.expect_command(id, ActuatorCommand::Pump(PumpDirection::Up)).hang();
    driver.expect_command(id, ActuatorCommand::SafeState).return_ack();

    let terminal = start_with(&driver, 1);
    let client = terminal.client();

    let pump = {
        let client = client.clone();
        tokio::spawn(async move { client.set_pump(id, PumpDirection::Up).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let report = client.emergency_stop_all().await.expect("Emergency stop must not fail");
    assert!(report.hardware_failures.is_empty());
    assert_eq!(
        pump.await.expect("Pump task panicked"),
        Err(ControlError::EmergencyStopActive)
    );

    // Nothing may follow the safe state, not even a late retry
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    assert_eq!(
        driver.received(),
        vec![
            (id, ActuatorCommand::Pump(PumpDirection::Up)),
            (id, ActuatorCommand::SafeState),
        ]
    );
    assert_eq!(client.get(id).await.map(|c| c.pump), Ok(PumpDirection::Off));
    assert_eq!(terminal.core().health(id, ActuatorKind::Pump), ActuatorHealth::Nominal);
    driver.verify();

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}
