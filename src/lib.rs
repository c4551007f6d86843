//! # Tint Control
//!
//! > **The control core of a colorant-tinting terminal.**
//!
//! This crate owns the live state of a dispenser's colorant canisters and
//! their actuators (agitator, valve, pump direction), enforces the physical
//! and safety rules on every change, and dispenses multi-canister formulas as
//! all-or-nothing transactions.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### One owner, explicit handles
//! There is no global machine state. A single [`CanisterRegistry`](registry::CanisterRegistry)
//! owns every canister and is shared by `Arc` with the components that need
//! it. Nothing mutates a canister except through the registry's atomic
//! update primitives, which reject any result that breaks an invariant.
//!
//! ### Rules before mutation
//! Every validation and capacity error is returned before anything changes.
//! A failed command leaves the registry exactly as it was, and no error is
//! fatal: the core keeps serving the next command.
//!
//! ## 🚀 Core Concepts
//!
//! ### Per-canister locking
//! Each canister has its own lock. Operations on different canisters run in
//! parallel; multi-canister operations take their locks in ascending id
//! order under a timeout, so overlapping formulas can never deadlock and a
//! stuck lock surfaces as [`ConcurrencyConflict`](error::ControlError::ConcurrencyConflict).
//!
//! ### Two-phase dispense
//! A formula commit checks every canister's volume, then withdraws all of
//! them in one step. An emergency stop raised in between aborts the commit
//! with nothing dispensed.
//!
//! ### Commanded state first
//! The registry reflects a command as soon as it is accepted. The hardware
//! acknowledgment follows; a missing acknowledgment is retried once, then the
//! actuator is marked degraded and the caller is told.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The State ([`model`], [`registry`])
//! - **Role**: Plain data types and the sole owner of canister state.
//! - **Key items**: [`Canister`](model::Canister), [`CanisterRegistry`](registry::CanisterRegistry),
//!   [`CanisterSetGuard`](registry::CanisterSetGuard).
//!
//! ### 2. The Rules ([`actuator`], [`level`], [`formula`])
//! - **Role**: Actuator interlock and emergency stop, bounded level changes,
//!   atomic dispense.
//! - **Key items**: [`ActuatorController`](actuator::ActuatorController),
//!   [`LevelAdjustmentEngine`](level::LevelAdjustmentEngine), [`FormulaComposer`](formula::FormulaComposer).
//!
//! ### 3. The Boundaries ([`hardware`], [`audit`], [`config`])
//! - **Role**: Ports to the outside world: the actuator driver, the audit
//!   event sink and the configuration store.
//! - **Key items**: [`HardwareDriver`](hardware::HardwareDriver), [`AuditSink`](audit::AuditSink),
//!   [`ConfigurationStore`](config::ConfigurationStore).
//!
//! ### 4. The Interface ([`control`], [`framework`], [`lifecycle`])
//! - **Role**: The client API as a mailbox actor, and the startup/shutdown
//!   orchestration around it.
//! - **Key items**: [`ControlClient`](framework::ControlClient), [`TintingTerminal`](lifecycle::TintingTerminal).
//!
//! ## 🧪 Testing
//!
//! [`hardware::mock::MockDriver`] scripts driver replies (ack, timeout, fault,
//! no reply at all). [`framework::mock`] tests client code without a core.
//!
//! ```bash
//! cargo test
//! ```

pub mod actuator;
pub mod audit;
pub mod config;
pub mod control;
pub mod error;
pub mod formula;
pub mod framework;
pub mod hardware;
pub mod level;
pub mod lifecycle;
pub mod model;
pub mod registry;

pub use error::{ControlError, ControlResult};
