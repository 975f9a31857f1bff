//! Lifecycle hooks for task workers.
//!
//! A worker process opens one [`PoliteClient`] when it starts and shares it
//! with every task it runs, so all tasks of the worker draw from the same
//! limits. Tasks obtain the client through [`get_client`] instead of
//! creating their own.

use crate::{ClientBuilder, ErrorKind, PoliteClient, Result};

/// Per-worker state handed to every task.
#[derive(Debug, Default)]
pub struct WorkerState {
    client: Option<PoliteClient>,
}

impl WorkerState {
    /// Create a state without a client
    #[must_use]
    pub const fn new() -> Self {
        Self { client: None }
    }

    /// Open the worker's client. Call this once when the worker starts.
    ///
    /// A client which is still open from an earlier call is replaced but
    /// not closed; clones held by running tasks keep working.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built, see [`ClientBuilder::client`].
    pub fn startup(&mut self, builder: ClientBuilder) -> Result<()> {
        let client = builder.client()?;
        log::info!("HTTP client opened.");
        log::info!("Rate limits: {:?}", client.settings());
        self.client = Some(client);
        Ok(())
    }

    /// Close the worker's client, waiting for its requests and pending
    /// releases. Call this once when the worker stops.
    pub async fn shutdown(&mut self) {
        if let Some(client) = self.client.take() {
            client.close().await;
            log::info!("HTTP client closed.");
        } else {
            log::info!("No HTTP client found. Continuing...");
        }
    }

    /// The worker's client, if one is open
    #[must_use]
    pub const fn client(&self) -> Option<&PoliteClient> {
        self.client.as_ref()
    }
}

/// Get the client shared by all tasks of a worker.
///
/// # Errors
///
/// Returns [`ErrorKind::ClientNotStarted`] if [`WorkerState::startup`] has
/// not been called, or the worker was shut down since.
pub fn get_client(state: &WorkerState) -> Result<PoliteClient> {
    state.client().cloned().ok_or(ErrorKind::ClientNotStarted)
}
