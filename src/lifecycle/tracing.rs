//! # Observability & Tracing
//!
//! [`setup_tracing`] installs the process-wide `tracing` subscriber. Every
//! component logs with structured fields (`canister`, `command`, `error`),
//! so a single canister or command can be followed through the log.
//!
//! ## Configuration
//!
//! Log levels come from `RUST_LOG`. The format is compact and hides module
//! paths (`with_target(false)`); the fields carry the context instead.
//!
//! ```bash
//! # State changes, rejected commands, emergency stops
//! RUST_LOG=info cargo run
//!
//! # Also lock acquisition, hardware acks and full payloads
//! RUST_LOG=debug cargo run
//!
//! # Only the formula composer
//! RUST_LOG=tint_control::formula=debug cargo run
//! ```
//!
//! ## Levels
//!
//! - `error`: emergency stop, actuator degraded, hardware fault
//! - `warn`: rejected commands, lock timeouts, reserve alerts, formula aborts
//! - `info`: successful state changes, startup and shutdown
//! - `debug`: payloads, acknowledgments, phase transitions of a commit
//!
//! Client calls are wrapped in `#[instrument]` spans, so with the compact
//! format a commit logs as:
//!
//! ```text
//! DEBUG commit{canisters=2}: commit called formula=DispenseFormula { .. }
//! DEBUG Locks acquired state=Checking canisters=2
//! DEBUG Check passed state=Committing
//!  INFO Formula dispensed state=Committed canisters=2 total_ml=500.0
//!  WARN Canister below reserve level canister=canister_2 level_ml=200.0
//! ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
