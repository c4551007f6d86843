//! Per-canister command ordering.
//!
//! Commands are ticketed while the canister lock is held, so ticket order is
//! the order the registry applied them in. The link sends one canister's
//! commands strictly in ticket order, one at a time, retry included.
//!
//! A `SafeState` ticket supersedes every older non-safe ticket on its lane.
//! A superseded command that is still queued is never sent, and one that is
//! waiting for its acknowledgment stops waiting and is not retried.

use crate::model::{ActuatorCommand, CanisterId};
use std::collections::BTreeSet;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug)]
struct LaneState {
    issued: u64,
    /// Lowest ticket that has not finished.
    next: u64,
    /// Finished tickets above `next`.
    finished_early: BTreeSet<u64>,
    /// Newest `SafeState` ticket, 0 if none.
    latest_safe: u64,
}

#[derive(Debug)]
pub(crate) struct Lane {
    state: Mutex<LaneState>,
    changed: Notify,
}

/// Whether a ticket got its turn on the lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Turn {
    Ready,
    Superseded,
}

impl Lane {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LaneState {
                issued: 0,
                next: 1,
                finished_early: BTreeSet::new(),
                latest_safe: 0,
            }),
            changed: Notify::new(),
        }
    }

    fn issue(&self, command: ActuatorCommand) -> u64 {
        let seq = {
            let mut state = self.lock();
            state.issued += 1;
            if command == ActuatorCommand::SafeState {
                state.latest_safe = state.issued;
            }
            state.issued
        };
        self.changed.notify_waiters();
        seq
    }

    fn finish(&self, seq: u64) {
        {
            let mut state = self.lock();
            if seq == state.next {
                state.next += 1;
                loop {
                    let next = state.next;
                    if !state.finished_early.remove(&next) {
                        break;
                    }
                    state.next += 1;
                }
            } else if seq > state.next {
                state.finished_early.insert(seq);
            }
        }
        self.changed.notify_waiters();
    }

    fn check(&self, seq: u64, command: ActuatorCommand) -> Option<Turn> {
        let state = self.lock();
        if command != ActuatorCommand::SafeState && state.latest_safe > seq {
            Some(Turn::Superseded)
        } else if state.next == seq {
            Some(Turn::Ready)
        } else {
            None
        }
    }

    /// Waits until every older ticket has finished, or until this one is
    /// superseded.
    pub(crate) async fn wait_turn(&self, seq: u64, command: ActuatorCommand) -> Turn {
        loop {
            let mut notified = pin!(self.changed.notified());
            notified.as_mut().enable();
            if let Some(turn) = self.check(seq, command) {
                return turn;
            }
            notified.await;
        }
    }

    /// Resolves once a newer `SafeState` ticket is issued. Never resolves for
    /// a `SafeState` ticket.
    pub(crate) async fn superseded(&self, seq: u64, command: ActuatorCommand) {
        loop {
            let mut notified = pin!(self.changed.notified());
            notified.as_mut().enable();
            if self.check(seq, command) == Some(Turn::Superseded) {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A command's place on its canister's lane.
///
/// Dropping a ticket, sent or not, lets the next one on the lane go.
#[derive(Debug)]
pub struct Ticket {
    lane: Arc<Lane>,
    seq: u64,
    canister_id: CanisterId,
    command: ActuatorCommand,
}

impl Ticket {
    pub(crate) fn issue(lane: Arc<Lane>, canister_id: CanisterId, command: ActuatorCommand) -> Self {
        let seq = lane.issue(command);
        Self {
            lane,
            seq,
            canister_id,
            command,
        }
    }

    pub fn canister_id(&self) -> CanisterId {
        self.canister_id
    }

    pub fn command(&self) -> ActuatorCommand {
        self.command
    }

    pub(crate) fn lane(&self) -> &Lane {
        &self.lane
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.lane.finish(self.seq);
    }
}
