//! # Audit Sinks
//!
//! The core reports every successful mutation, every reserve-threshold
//! crossing and every formula abort to an [`AuditSink`]. Where the events end
//! up (a journal, a message bus, a log) is the sink's business.
//!
//! `emit` is synchronous and must not block: it is called while the core
//! is on its command path. Sinks that need I/O should hand the event to a
//! task, as [`ChannelAuditSink`] does.

use crate::model::{AuditEvent, AuditEventKind};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes every event to the `tracing` pipeline.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let canister = event
            .canister_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        match event.kind {
            AuditEventKind::ReserveAlert | AuditEventKind::EmergencyStop => {
                warn!(kind = ?event.kind, canister = %canister, details = ?event.details, "Audit")
            }
            _ => info!(kind = ?event.kind, canister = %canister, details = ?event.details, "Audit"),
        }
    }
}

/// Forwards events to an unbounded channel consumed elsewhere.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    sender: mpsc::UnboundedSender<AuditEvent>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: AuditEvent) {
        if self.sender.send(event).is_err() {
            warn!("Audit receiver dropped; event discarded");
        }
    }
}

/// Keeps events in memory. Cloning shares the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.buffer().clone()
    }

    pub fn events_of(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.buffer()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<AuditEvent> {
        std::mem::take(&mut *self.buffer())
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.buffer().push(event);
    }
}
