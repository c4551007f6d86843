//! # Control Actor
//!
//! The server half of the mailbox. It owns the receiver and a handle to the
//! [`ControlCore`], and turns each [`ControlRequest`] into a core call.
//!
//! # Architecture Note
//! The core does its own locking per canister, so the actor does not need to
//! serialize commands itself. Each command runs on its own task; commands on
//! independent canisters proceed in parallel and a slow hardware
//! acknowledgment on one canister does not hold up the mailbox.
//!
//! Emergency stop and `clear_emergency` are the exceptions: they run inline,
//! so every command received after a stop is dispatched only once the safe
//! state has been applied. On shutdown (all clients dropped) the actor waits
//! for the commands still running before it exits.

use super::client::ControlClient;
use super::message::{ControlRequest, Response};
use crate::control::ControlCore;
use crate::error::ControlResult;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct ControlActor {
    receiver: mpsc::Receiver<ControlRequest>,
    core: Arc<ControlCore>,
}

impl ControlActor {
    /// Creates the actor and its client.
    ///
    /// `buffer_size` is the mailbox capacity; once it is full, client calls
    /// wait for space.
    pub fn new(core: Arc<ControlCore>, buffer_size: usize) -> (Self, ControlClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (Self { receiver, core }, ControlClient::new(sender))
    }

    /// Runs the event loop until every client is dropped.
    pub async fn run(mut self) {
        info!("Control actor started");
        let mut running: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(request) => self.handle(request, &mut running).await,
                    None => break,
                },
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Command task failed");
                    }
                }
            }
        }

        let draining = running.len();
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Command task failed");
            }
        }
        info!(drained = draining, "Control actor shutdown");
    }

    async fn handle(&self, request: ControlRequest, running: &mut JoinSet<()>) {
        let command = request.name();
        debug!(command, "Request received");
        let core = self.core.clone();

        match request {
            ControlRequest::EmergencyStopAll { respond_to } => {
                let result = core.emergency_stop_all().await;
                reply(command, respond_to, result);
            }
            ControlRequest::ClearEmergency { respond_to } => {
                reply(command, respond_to, Ok(core.clear_emergency()));
            }
            ControlRequest::Status { respond_to } => {
                reply(command, respond_to, Ok(core.status()));
            }
            ControlRequest::List { respond_to } => {
                spawn_command(running, command, respond_to, async move { core.list().await });
            }
            ControlRequest::Get { id, respond_to } => {
                spawn_command(running, command, respond_to, async move { core.get(id).await });
            }
            ControlRequest::SetAgitator { id, on, respond_to } => {
                spawn_command(running, command, respond_to, async move { core.set_agitator(id, on).await });
            }
            ControlRequest::SetValve { id, open, respond_to } => {
                spawn_command(running, command, respond_to, async move { core.set_valve(id, open).await });
            }
            ControlRequest::SetPump {
                id,
                direction,
                respond_to,
            } => {
                spawn_command(running, command, respond_to, async move {
                    core.set_pump(id, direction).await
                });
            }
            ControlRequest::ApplyClamped {
                id,
                delta_ml,
                respond_to,
            } => {
                spawn_command(running, command, respond_to, async move {
                    core.apply_clamped(id, delta_ml).await
                });
            }
            ControlRequest::ApplyStrict {
                id,
                delta_ml,
                respond_to,
            } => {
                spawn_command(running, command, respond_to, async move {
                    core.apply_strict(id, delta_ml).await
                });
            }
            ControlRequest::Compose { volumes, respond_to } => {
                spawn_command(running, command, respond_to, async move { core.compose(volumes).await });
            }
            ControlRequest::Commit { formula, respond_to } => {
                spawn_command(running, command, respond_to, async move { core.commit(&formula).await });
            }
            ControlRequest::Resize { new_count, respond_to } => {
                spawn_command(running, command, respond_to, async move { core.resize(new_count).await });
            }
            ControlRequest::Reconfigure { config, respond_to } => {
                spawn_command(running, command, respond_to, async move { core.reconfigure(config).await });
            }
            ControlRequest::Summary { respond_to } => {
                spawn_command(running, command, respond_to, async move { core.summary().await });
            }
        }
    }
}

fn spawn_command<T, F>(running: &mut JoinSet<()>, command: &'static str, respond_to: Response<T>, work: F)
where
    T: Send + 'static,
    F: Future<Output = ControlResult<T>> + Send + 'static,
{
    running.spawn(async move {
        let result = work.await;
        reply(command, respond_to, result);
    });
}

fn reply<T>(command: &'static str, respond_to: Response<T>, result: ControlResult<T>) {
    match &result {
        Ok(_) => debug!(command, "Command ok"),
        Err(e) => warn!(command, error = %e, "Command failed"),
    }
    if respond_to.send(result).is_err() {
        debug!(command, "Caller went away before the reply");
    }
}
