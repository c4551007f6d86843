//! # Mock Mailbox
//!
//! Utilities for testing code that holds a [`ControlClient`] without spinning
//! up a real core.
//!
//! Use [`create_mock_client`] to get a client and the raw request receiver,
//! then the `expect_*` helpers to pull requests off it and answer them. For a
//! fluent style, [`MockControl`] answers from a queue of expectations instead.

use super::client::ControlClient;
use super::message::{ControlRequest, Response};
use crate::error::ControlResult;
use crate::model::{Canister, CanisterId, DispenseFormula, DispenseReceipt, PumpDirection};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

enum Expectation {
    Get {
        id: CanisterId,
        response: ControlResult<Canister>,
    },
    SetPump {
        id: CanisterId,
        direction: PumpDirection,
        response: ControlResult<Canister>,
    },
    Commit {
        response: ControlResult<DispenseReceipt>,
    },
}

type Expectations = Arc<Mutex<VecDeque<Expectation>>>;

fn lock(expectations: &Expectations) -> MutexGuard<'_, VecDeque<Expectation>> {
    expectations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A mock mailbox answering requests from queued expectations, in order.
///
/// # Example
/// ```ignore
/// let mock = MockControl::new();
/// mock.expect_set_pump(CanisterId(1), PumpDirection::Up).return_ok(canister);
/// let client = mock.client();
/// // exercise code that uses the client...
/// mock.verify();
/// ```
///
/// A request that does not match the next expectation panics the mock's
/// task, so the caller sees `ActorDropped`.
pub struct MockControl {
    client: ControlClient,
    expectations: Expectations,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockControl {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel::<ControlRequest>(100);
        let expectations: Expectations = Arc::new(Mutex::new(VecDeque::new()));
        let queued = expectations.clone();

        let handle = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let expectation = lock(&queued).pop_front();
                match (request, expectation) {
                    (ControlRequest::Get { id, respond_to }, Some(Expectation::Get { id: expected, response })) => {
                        assert_eq!(id, expected, "get for the wrong canister");
                        let _ = respond_to.send(response);
                    }
                    (
                        ControlRequest::SetPump {
                            id,
                            direction,
                            respond_to,
                        },
                        Some(Expectation::SetPump {
                            id: expected_id,
                            direction: expected_direction,
                            response,
                        }),
                    ) => {
                        assert_eq!((id, direction), (expected_id, expected_direction), "unexpected set_pump");
                        let _ = respond_to.send(response);
                    }
                    (ControlRequest::Commit { respond_to, .. }, Some(Expectation::Commit { response })) => {
                        let _ = respond_to.send(response);
                    }
                    (request, _) => {
                        panic!("Unexpected request or expectation mismatch: {}", request.name());
                    }
                }
            }
        });

        Self {
            client: ControlClient::new(sender),
            expectations,
            _handle: handle,
        }
    }

    pub fn client(&self) -> ControlClient {
        self.client.clone()
    }

    pub fn expect_get(&self, id: CanisterId) -> CanisterExpectationBuilder {
        CanisterExpectationBuilder {
            target: CanisterTarget::Get(id),
            expectations: self.expectations.clone(),
        }
    }

    pub fn expect_set_pump(&self, id: CanisterId, direction: PumpDirection) -> CanisterExpectationBuilder {
        CanisterExpectationBuilder {
            target: CanisterTarget::SetPump(id, direction),
            expectations: self.expectations.clone(),
        }
    }

    pub fn expect_commit(&self) -> CommitExpectationBuilder {
        CommitExpectationBuilder {
            expectations: self.expectations.clone(),
        }
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let remaining = lock(&self.expectations).len();
        if remaining > 0 {
            panic!("Not all expectations were met. {} remaining", remaining);
        }
    }
}

impl Default for MockControl {
    fn default() -> Self {
        Self::new()
    }
}

enum CanisterTarget {
    Get(CanisterId),
    SetPump(CanisterId, PumpDirection),
}

/// Builder for requests answered with a canister snapshot.
pub struct CanisterExpectationBuilder {
    target: CanisterTarget,
    expectations: Expectations,
}

impl CanisterExpectationBuilder {
    pub fn return_ok(self, canister: Canister) {
        self.push(Ok(canister));
    }

    pub fn return_err(self, error: crate::error::ControlError) {
        self.push(Err(error));
    }

    fn push(self, response: ControlResult<Canister>) {
        let expectation = match self.target {
            CanisterTarget::Get(id) => Expectation::Get { id, response },
            CanisterTarget::SetPump(id, direction) => Expectation::SetPump {
                id,
                direction,
                response,
            },
        };
        lock(&self.expectations).push_back(expectation);
    }
}

/// Builder for `commit` expectations.
pub struct CommitExpectationBuilder {
    expectations: Expectations,
}

impl CommitExpectationBuilder {
    pub fn return_ok(self, receipt: DispenseReceipt) {
        lock(&self.expectations).push_back(Expectation::Commit { response: Ok(receipt) });
    }

    pub fn return_err(self, error: crate::error::ControlError) {
        lock(&self.expectations).push_back(Expectation::Commit { response: Err(error) });
    }
}

// =============================================================================
// RAW RECEIVER HELPERS
// =============================================================================

/// Creates a client whose requests arrive on the returned receiver.
///
/// # Testing Strategy
/// Nothing answers the requests unless the test does. Pull them off the
/// receiver with the `expect_*` helpers, assert on the arguments, and reply
/// through the returned sender to simulate success, failure or delay.
pub fn create_mock_client(buffer_size: usize) -> (ControlClient, mpsc::Receiver<ControlRequest>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (ControlClient::new(sender), receiver)
}

/// Next request, if it is a `get`.
pub async fn expect_get(receiver: &mut mpsc::Receiver<ControlRequest>) -> Option<(CanisterId, Response<Canister>)> {
    match receiver.recv().await {
        Some(ControlRequest::Get { id, respond_to }) => Some((id, respond_to)),
        _ => None,
    }
}

/// Next request, if it is a `compose`.
pub async fn expect_compose(
    receiver: &mut mpsc::Receiver<ControlRequest>,
) -> Option<(std::collections::BTreeMap<CanisterId, f64>, Response<DispenseFormula>)> {
    match receiver.recv().await {
        Some(ControlRequest::Compose { volumes, respond_to }) => Some((volumes, respond_to)),
        _ => None,
    }
}

/// Next request, if it is a `commit`.
pub async fn expect_commit(
    receiver: &mut mpsc::Receiver<ControlRequest>,
) -> Option<(DispenseFormula, Response<DispenseReceipt>)> {
    match receiver.recv().await {
        Some(ControlRequest::Commit { formula, respond_to }) => Some((formula, respond_to)),
        _ => None,
    }
}

/// Next request, if it is an emergency stop. Returns only the responder.
pub async fn expect_emergency_stop(
    receiver: &mut mpsc::Receiver<ControlRequest>,
) -> Option<Response<crate::actuator::EmergencyStopReport>> {
    match receiver.recv().await {
        Some(ControlRequest::EmergencyStopAll { respond_to }) => Some(respond_to),
        _ => None,
    }
}
