use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tint_control::audit::MemoryAuditSink;
use tint_control::config::StaticConfigStore;
use tint_control::error::ControlError;
use tint_control::hardware::SimulatedDriver;
use tint_control::lifecycle::TintingTerminal;
use tint_control::model::{CanisterId, LevelSeed, MachineConfig, MachineStatus, RuntimeSettings};
use tokio::task::JoinSet;

const START_ML: f64 = 3000.0;
const ROUNDS: usize = 60;
const LEFT_ML: f64 = 10.0;
const RIGHT_ML: f64 = 5.0;

fn start_three() -> TintingTerminal {
    let store = StaticConfigStore::new(MachineConfig::with_limits(3, START_ML, 100.0)).with_runtime(RuntimeSettings {
        level_seed: LevelSeed::Uniform(START_ML),
        lock_timeout_ms: 5_000,
        ..RuntimeSettings::default()
    });
    TintingTerminal::start(
        &store,
        Arc::new(SimulatedDriver::instant()),
        Arc::new(MemoryAuditSink::new()),
    )
    .expect("Failed to start terminal")
}

/// Commits on `{1,2}` and `{2,3}` race each other while a reader keeps taking
/// snapshots. Every snapshot must be explainable by whole commits only.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_commits_never_expose_partial_state() {
    let terminal = start_three();
    let client = terminal.client();

    let left = BTreeMap::from([(CanisterId(1), LEFT_ML), (CanisterId(2), LEFT_ML)]);
    let right = BTreeMap::from([(CanisterId(2), RIGHT_ML), (CanisterId(3), RIGHT_ML)]);

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let client = client.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut snapshots = 0usize;
            loop {
                let finished = done.load(Ordering::SeqCst);
                let all = client.list().await.expect("List failed");
                let level = |id: u32| all[id as usize - 1].level_ml;

                let left_done = (START_ML - level(1)) / LEFT_ML;
                let right_done = (START_ML - level(3)) / RIGHT_ML;
                assert_eq!(left_done.fract(), 0.0, "canister 1 in a partial state");
                assert_eq!(right_done.fract(), 0.0, "canister 3 in a partial state");
                assert_eq!(
                    level(2),
                    START_ML - left_done * LEFT_ML - right_done * RIGHT_ML,
                    "canister 2 out of step with its neighbours"
                );
                snapshots += 1;
                if finished {
                    break;
                }
                tokio::task::yield_now().await;
            }
            snapshots
        })
    };

    let mut commits = JoinSet::new();
    for round in 0..ROUNDS {
        let volumes = if round % 2 == 0 { left.clone() } else { right.clone() };
        let client = client.clone();
        commits.spawn(async move { client.dispense(volumes).await });
    }

    let outcomes = tokio::time::timeout(Duration::from_secs(30), async {
        let mut outcomes = Vec::new();
        while let Some(joined) = commits.join_next().await {
            outcomes.push(joined.expect("Commit task panicked"));
        }
        outcomes
    })
    .await
    .expect("Commits deadlocked");

    done.store(true, Ordering::SeqCst);
    let snapshots = reader.await.expect("Reader panicked");
    assert!(snapshots > 0);

    for outcome in &outcomes {
        assert!(
            matches!(outcome, Ok(_) | Err(ControlError::ConcurrencyConflict(_))),
            "unexpected outcome {:?}",
            outcome
        );
    }

    let left_ok = outcomes
        .iter()
        .filter_map(|o| o.as_ref().ok())
        .filter(|r| r.dispensed.contains_key(&CanisterId(1)))
        .count() as f64;
    let right_ok = outcomes
        .iter()
        .filter_map(|o| o.as_ref().ok())
        .filter(|r| r.dispensed.contains_key(&CanisterId(3)))
        .count() as f64;

    let all = client.list().await.expect("List failed");
    assert_eq!(all[0].level_ml, START_ML - left_ok * LEFT_ML);
    assert_eq!(all[1].level_ml, START_ML - left_ok * LEFT_ML - right_ok * RIGHT_ML);
    assert_eq!(all[2].level_ml, START_ML - right_ok * RIGHT_ML);
    assert_eq!(client.status().await, Ok(MachineStatus::Ready));

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}

/// Two commits that each fit alone but not together: exactly one wins and
/// the loser sees the level the winner left behind.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_competing_commits_do_not_overdraw() {
    let store = StaticConfigStore::new(MachineConfig::with_limits(2, 3000.0, 0.0)).with_runtime(RuntimeSettings {
        level_seed: LevelSeed::Explicit(vec![3000.0, 700.0]),
        ..RuntimeSettings::default()
    });
    let terminal = TintingTerminal::start(
        &store,
        Arc::new(SimulatedDriver::instant()),
        Arc::new(MemoryAuditSink::new()),
    )
    .expect("Failed to start terminal");
    let client = terminal.client();

    let first = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .dispense(BTreeMap::from([(CanisterId(1), 100.0), (CanisterId(2), 400.0)]))
                .await
        })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.dispense(BTreeMap::from([(CanisterId(2), 400.0)])).await })
    };

    let results = [
        first.await.expect("First task panicked"),
        second.await.expect("Second task panicked"),
    ];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);

    let loser = results.iter().find_map(|r| r.as_ref().err()).expect("One commit must fail");
    match loser {
        ControlError::InsufficientVolume { shortfalls } => {
            assert_eq!(shortfalls.len(), 1);
            assert_eq!(shortfalls[0].canister_id, CanisterId(2));
            assert_eq!(shortfalls[0].available_ml, 300.0);
        }
        other => panic!("Expected InsufficientVolume, got {:?}", other),
    }
    assert_eq!(client.get(CanisterId(2)).await.map(|c| c.level_ml), Ok(300.0));

    drop(client);
    terminal.shutdown().await.expect("Shutdown failed");
}
