//! # Tinting Terminal Demo
//!
//! Starts the control core against a simulated dispenser and walks through a
//! short operator session: pump interlock, a dispense that falls short, a
//! dispense that succeeds, and an emergency stop.
//!
//! ```bash
//! RUST_LOG=info cargo run
//! RUST_LOG=debug cargo run -- terminal.json
//! ```
//!
//! Without an argument the factory configuration is used (16 canisters,
//! 3000 ml maximum, 500 ml reserve).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tint_control::audit::TracingAuditSink;
use tint_control::config::{ConfigurationStore, JsonFileConfigStore, StaticConfigStore};
use tint_control::hardware::SimulatedDriver;
use tint_control::lifecycle::{setup_tracing, TintingTerminal};
use tint_control::model::{CanisterId, PumpDirection};
use tracing::{error, info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let store: Box<dyn ConfigurationStore> = match std::env::args().nth(1) {
        Some(path) => Box::new(JsonFileConfigStore::new(path)),
        None => Box::new(StaticConfigStore::default()),
    };
    let terminal = TintingTerminal::start(
        store.as_ref(),
        Arc::new(SimulatedDriver::new(Duration::from_millis(5))),
        Arc::new(TracingAuditSink),
    )
    .map_err(|e| e.to_string())?;
    let client = terminal.client();

    let summary = client.summary().await.map_err(|e| e.to_string())?;
    info!(
        status = %summary.status,
        canisters = summary.canister_count,
        average_level_ml = summary.average_level_ml,
        low_stock = ?summary.low_stock,
        "Terminal ready"
    );

    let span = tracing::info_span!("pump_interlock");
    async {
        let id = CanisterId(1);
        if let Err(e) = client.set_pump(id, PumpDirection::Up).await {
            error!(error = %e, "Pump start failed");
        }
        match client.set_pump(id, PumpDirection::Down).await {
            Ok(_) => error!("Direct pump reversal was accepted"),
            Err(e) => info!(error = %e, "Direct reversal refused as expected"),
        }
        if let Err(e) = client.set_pump(id, PumpDirection::Off).await {
            error!(error = %e, "Pump stop failed");
        }
    }
    .instrument(span)
    .await;

    let span = tracing::info_span!("dispense");
    async {
        let level = client
            .get(CanisterId(2))
            .await
            .map(|c| c.level_ml)
            .unwrap_or_default();

        let too_much = BTreeMap::from([(CanisterId(1), 100.0), (CanisterId(2), level + 100.0)]);
        if let Err(e) = client.dispense(too_much).await {
            info!(error = %e, "Oversized formula rejected, nothing dispensed");
        }

        let formula = BTreeMap::from([(CanisterId(1), 120.0), (CanisterId(2), 45.5), (CanisterId(5), 0.0)]);
        match client.dispense(formula).await {
            Ok(receipt) => info!(
                total_ml = receipt.total_ml,
                reserve_alerts = ?receipt.reserve_alerts,
                "Formula dispensed"
            ),
            Err(e) => error!(error = %e, "Dispense failed"),
        }
    }
    .instrument(span)
    .await;

    let span = tracing::info_span!("emergency");
    async {
        match client.emergency_stop_all().await {
            Ok(report) => info!(
                canisters = report.canisters.len(),
                hardware_failures = report.hardware_failures.len(),
                "Emergency stop complete"
            ),
            Err(e) => error!(error = %e, "Emergency stop failed"),
        }
        if let Err(e) = client.dispense(BTreeMap::from([(CanisterId(3), 10.0)])).await {
            info!(error = %e, "Dispense refused while latched");
        }
        let _ = client.clear_emergency().await;
        info!(status = ?client.status().await, "Emergency latch cleared");
    }
    .instrument(span)
    .await;

    drop(client);
    terminal.shutdown().await?;
    info!("Demo completed");
    Ok(())
}
