//! # Mock Driver
//!
//! Expectation-driven [`HardwareDriver`] for tests.
//!
//! Queue the commands you expect with [`MockDriver::expect_command`] and pick
//! the reply with the returned builder. Each incoming command consumes the
//! first queued expectation with the same canister and command, so commands
//! dispatched concurrently (emergency stop fans out one per canister) match
//! regardless of arrival order.
//!
//! # Example
//! ```ignore
//! let driver = Arc::new(MockDriver::new());
//! driver.expect_command(CanisterId(1), ActuatorCommand::Valve(true)).return_timeout();
//! driver.expect_command(CanisterId(1), ActuatorCommand::Valve(true)).return_ack();
//! // drive the system...
//! driver.verify(); // all expectations consumed, nothing unexpected arrived
//! ```

use super::{DriverReply, HardwareDriver};
use crate::model::{ActuatorCommand, CanisterId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// =============================================================================
// EXPECTATIONS
// =============================================================================

#[derive(Debug, Clone)]
enum Behavior {
    Reply(DriverReply),
    /// Never answers within any realistic acknowledgment timeout.
    Hang,
}

#[derive(Debug)]
struct Expectation {
    canister_id: CanisterId,
    command: ActuatorCommand,
    behavior: Behavior,
}

#[derive(Debug, Default)]
struct MockState {
    expectations: VecDeque<Expectation>,
    received: Vec<(CanisterId, ActuatorCommand)>,
    unexpected: Vec<(CanisterId, ActuatorCommand)>,
}

/// What to do with commands nobody queued an expectation for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unmatched {
    /// Reply with a fault and fail `verify`.
    Reject,
    /// Acknowledge silently.
    Ack,
}

pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    unmatched: Unmatched,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Strict mock: any command without an expectation is a failure.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            unmatched: Unmatched::Reject,
        }
    }

    /// Acknowledges any command without an expectation.
    pub fn permissive() -> Self {
        Self {
            unmatched: Unmatched::Ack,
            ..Self::new()
        }
    }

    pub fn expect_command(&self, canister_id: CanisterId, command: ActuatorCommand) -> CommandExpectationBuilder {
        CommandExpectationBuilder {
            canister_id,
            command,
            state: self.state.clone(),
        }
    }

    /// Every command received so far, in arrival order.
    pub fn received(&self) -> Vec<(CanisterId, ActuatorCommand)> {
        self.lock().received.clone()
    }

    /// Panics unless every expectation was consumed and nothing unexpected
    /// arrived.
    pub fn verify(&self) {
        let state = self.lock();
        if !state.expectations.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining: {:?}",
                state.expectations.len(),
                state.expectations
            );
        }
        if !state.unexpected.is_empty() {
            panic!("Unexpected hardware commands: {:?}", state.unexpected);
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HardwareDriver for MockDriver {
    async fn send_actuator_command(&self, canister_id: CanisterId, command: ActuatorCommand) -> DriverReply {
        let behavior = {
            let mut state = self.lock();
            state.received.push((canister_id, command));
            let position = state
                .expectations
                .iter()
                .position(|e| e.canister_id == canister_id && e.command == command);
            match position.and_then(|index| state.expectations.remove(index)) {
                Some(expectation) => expectation.behavior,
                None => match self.unmatched {
                    Unmatched::Ack => Behavior::Reply(DriverReply::Ack),
                    Unmatched::Reject => {
                        state.unexpected.push((canister_id, command));
                        Behavior::Reply(DriverReply::Fault("unexpected command".to_string()))
                    }
                },
            }
        };

        match behavior {
            Behavior::Reply(reply) => reply,
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                DriverReply::Timeout
            }
        }
    }
}

/// Builder for one queued command expectation.
pub struct CommandExpectationBuilder {
    canister_id: CanisterId,
    command: ActuatorCommand,
    state: Arc<Mutex<MockState>>,
}

impl CommandExpectationBuilder {
    pub fn return_ack(self) {
        self.push(Behavior::Reply(DriverReply::Ack));
    }

    /// The driver itself reports a timeout.
    pub fn return_timeout(self) {
        self.push(Behavior::Reply(DriverReply::Timeout));
    }

    pub fn return_fault(self, reason: &str) {
        self.push(Behavior::Reply(DriverReply::Fault(reason.to_string())));
    }

    /// No reply at all; the link's own acknowledgment timeout has to fire.
    pub fn hang(self) {
        self.push(Behavior::Hang);
    }

    fn push(self, behavior: Behavior) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.expectations.push_back(Expectation {
            canister_id: self.canister_id,
            command: self.command,
            behavior,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expectations_match_out_of_order() {
        let driver = MockDriver::new();
        driver.expect_command(CanisterId(1), ActuatorCommand::SafeState).return_ack();
        driver
            .expect_command(CanisterId(2), ActuatorCommand::SafeState)
            .return_fault("jammed");

        let second = driver
            .send_actuator_command(CanisterId(2), ActuatorCommand::SafeState)
            .await;
        let first = driver
            .send_actuator_command(CanisterId(1), ActuatorCommand::SafeState)
            .await;

        assert_eq!(second, DriverReply::Fault("jammed".to_string()));
        assert_eq!(first, DriverReply::Ack);
        driver.verify();
    }

    #[tokio::test]
    #[should_panic(expected = "Unexpected hardware commands")]
    async fn strict_mock_flags_unexpected_commands() {
        let driver = MockDriver::new();
        let reply = driver
            .send_actuator_command(CanisterId(4), ActuatorCommand::Valve(true))
            .await;
        assert!(matches!(reply, DriverReply::Fault(_)));
        driver.verify();
    }

    #[tokio::test]
    async fn permissive_mock_acks_and_records() {
        let driver = MockDriver::permissive();
        let reply = driver
            .send_actuator_command(CanisterId(4), ActuatorCommand::Valve(true))
            .await;
        assert_eq!(reply, DriverReply::Ack);
        assert_eq!(driver.received(), vec![(CanisterId(4), ActuatorCommand::Valve(true))]);
        driver.verify();
    }
}
