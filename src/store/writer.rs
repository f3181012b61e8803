//! StoreWriter - ordered, fire-and-forget writes to the remote store
//!
//! Every local mutation of a writer node becomes one `Set` command. A single
//! task applies the commands in the order they were issued, so two quick
//! writes to the same path can never be reordered on the wire, and callers
//! never wait for the network.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::RemoteStore;
use crate::error::StoreError;

/// Called with the store error when a queued write fails
pub type FailureCallback = Arc<dyn Fn(StoreError) + Send + Sync>;

/// Commands for the writer actor
pub enum WriteCommand {
    /// Write a value, reporting failure through `on_error`
    Set {
        path: String,
        value: Value,
        on_error: Option<FailureCallback>,
    },
    /// Resolve once every previously queued write has been applied
    Flush { response: oneshot::Sender<()> },
    /// Stop the actor after draining what is already queued
    Shutdown,
}

impl std::fmt::Debug for WriteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteCommand::Set { path, value, .. } => f
                .debug_struct("Set")
                .field("path", path)
                .field("value", value)
                .finish(),
            WriteCommand::Flush { .. } => f.write_str("Flush"),
            WriteCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Handle for queueing writes
///
/// Cheap to clone; every sync node of a mirror shares the same writer.
#[derive(Clone)]
pub struct StoreWriter {
    cmd_tx: mpsc::UnboundedSender<WriteCommand>,
}

impl StoreWriter {
    /// Create a handle around an existing command channel
    pub fn new(cmd_tx: mpsc::UnboundedSender<WriteCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Spawn the writer actor for `store` and return its handle
    pub fn spawn(store: Arc<dyn RemoteStore>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let actor = WriterActor {
            store,
            command_rx: cmd_rx,
            write_count: 0,
            failure_count: 0,
        };
        tokio::spawn(actor.run());
        Self::new(cmd_tx)
    }

    /// Queue a write
    ///
    /// Fire-and-forget: returns immediately. If the actor is gone the write
    /// is reported as failed through `on_error`.
    pub fn set(&self, path: impl Into<String>, value: Value, on_error: Option<FailureCallback>) {
        let path = path.into();
        let cmd = WriteCommand::Set {
            path: path.clone(),
            value,
            on_error,
        };
        if let Err(mpsc::error::SendError(cmd)) = self.cmd_tx.send(cmd) {
            warn!(path = %path, "Store writer stopped, dropping write");
            if let WriteCommand::Set {
                on_error: Some(callback),
                ..
            } = cmd
            {
                callback(StoreError::Unavailable("store writer stopped".to_string()));
            }
        }
    }

    /// Wait until every write queued before this call has been applied
    pub async fn flush(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(WriteCommand::Flush {
                response: response_tx,
            })
            .is_err()
        {
            return;
        }
        let _ = response_rx.await;
    }

    /// Signal the actor to stop after the queued writes
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(WriteCommand::Shutdown);
    }
}

struct WriterActor {
    store: Arc<dyn RemoteStore>,
    command_rx: mpsc::UnboundedReceiver<WriteCommand>,
    write_count: u64,
    failure_count: u64,
}

impl WriterActor {
    async fn run(mut self) {
        debug!(store = self.store.name(), "Store writer started");

        while let Some(cmd) = self.command_rx.recv().await {
            trace!(?cmd, "Processing write command");

            match cmd {
                WriteCommand::Set {
                    path,
                    value,
                    on_error,
                } => {
                    self.write_count += 1;
                    if let Err(e) = self.store.set(&path, value).await {
                        self.failure_count += 1;
                        warn!(path = %path, error = %e, "Remote write failed");
                        if let Some(callback) = on_error {
                            callback(e);
                        }
                    }
                }
                WriteCommand::Flush { response } => {
                    let _ = response.send(());
                }
                WriteCommand::Shutdown => {
                    info!("Store writer received shutdown command");
                    break;
                }
            }
        }

        info!(
            writes = self.write_count,
            failures = self.failure_count,
            "Store writer terminated"
        );
    }
}
