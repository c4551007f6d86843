use crate::audit::AuditSink;
use crate::config::ConfigurationStore;
use crate::control::ControlCore;
use crate::error::ControlResult;
use crate::framework::{ControlActor, ControlClient};
use crate::hardware::HardwareDriver;
use crate::registry::ResizeOutcome;
use std::sync::Arc;
use tracing::{error, info};

/// The running control core of one tinting terminal.
///
/// `TintingTerminal` is responsible for:
/// - **Startup**: reading the configuration store and initializing the core
/// - **Wiring**: connecting the core to its hardware driver and audit sink
/// - **Lifecycle**: running the control actor and shutting it down cleanly
///
/// # Example
///
/// ```ignore
/// let terminal = TintingTerminal::start(&store, driver, audit)?;
///
/// let client = terminal.client();
/// client.set_valve(CanisterId(1), true).await?;
///
/// terminal.shutdown().await?;
/// ```
pub struct TintingTerminal {
    client: ControlClient,
    core: Arc<ControlCore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TintingTerminal {
    /// Loads the configuration, initializes the core and spawns the control
    /// actor. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// `ConfigInvalid` if the store cannot be read or its configuration is
    /// rejected.
    pub fn start(
        store: &dyn ConfigurationStore,
        driver: Arc<dyn HardwareDriver>,
        audit: Arc<dyn AuditSink>,
    ) -> ControlResult<Self> {
        let config = store.load_config()?;
        let runtime = store.load_runtime()?;
        info!(
            model = %config.model_number,
            serial = %config.serial_number,
            canisters = config.num_canisters,
            "Starting tinting terminal"
        );

        let core = Arc::new(ControlCore::new(config, &runtime, driver, audit)?);
        let (actor, client) = ControlActor::new(core.clone(), runtime.mailbox_capacity.max(1));
        let handle = tokio::spawn(actor.run());

        Ok(Self { client, core, handle })
    }

    pub fn client(&self) -> ControlClient {
        self.client.clone()
    }

    /// Direct access to the core, bypassing the mailbox.
    pub fn core(&self) -> &Arc<ControlCore> {
        &self.core
    }

    /// Re-reads the machine configuration and applies it.
    pub async fn reload_config(&self, store: &dyn ConfigurationStore) -> ControlResult<ResizeOutcome> {
        let config = store.load_config()?;
        self.client.reconfigure(config).await
    }

    /// Gracefully shuts down the terminal.
    ///
    /// Drops the terminal's client, which closes the mailbox once every other
    /// clone is gone too, then waits for the actor to finish the commands it
    /// is still running.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the actor shut down cleanly
    /// - `Err(String)` if the actor task failed or panicked
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down terminal...");
        drop(self.client);

        if let Err(e) = self.handle.await {
            error!("Control actor failed: {:?}", e);
            return Err(format!("Control actor failed: {:?}", e));
        }

        info!("Terminal shutdown complete.");
        Ok(())
    }
}
