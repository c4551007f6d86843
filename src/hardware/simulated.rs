//! Stand-in driver for running the terminal without a machine attached.

use super::{DriverReply, HardwareDriver};
use crate::model::{ActuatorCommand, CanisterId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Acknowledges every command after a fixed latency.
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    latency: Duration,
    sent: AtomicU64,
}

impl SimulatedDriver {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            sent: AtomicU64::new(0),
        }
    }

    /// Acknowledges immediately.
    pub fn instant() -> Self {
        Self::default()
    }

    pub fn commands_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HardwareDriver for SimulatedDriver {
    async fn send_actuator_command(&self, canister_id: CanisterId, command: ActuatorCommand) -> DriverReply {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let count = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(canister = %canister_id, ?command, count, "Simulated ack");
        DriverReply::Ack
    }
}
