//! Error types shared by the sync layer and the orchestrator
//!
//! None of these are fatal: the controller is long-running and absorbs them
//! by logging or by surfacing them as observable state.

use thiserror::Error;

/// Failure talking to the remote key-value store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store is unreachable (offline, auth lost, connection dropped)
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// Value could not be encoded for the wire
    #[error("failed to encode value for '{path}': {reason}")]
    Encode { path: String, reason: String },
}

/// Errors raised by sync nodes, node arrays and the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A store read/write/subscribe failed; the node keeps its last known value
    #[error("remote unavailable on '{path}': {source}")]
    RemoteUnavailable {
        path: String,
        #[source]
        source: StoreError,
    },

    /// Pick request or draft activation with no decoded row held
    #[error("no pick available")]
    NoPickAvailable,

    /// `set_node` called with an index outside the current array
    #[error("pedal index {id} out of range (array holds {count})")]
    PedalIndexOutOfRange { id: usize, count: usize },

    /// Write attempted on a node that only reads
    #[error("node '{0}' is read-only")]
    ReadOnly(String),
}

impl SyncError {
    /// Wrap a store failure on a given path
    pub fn remote(path: impl Into<String>, source: StoreError) -> Self {
        SyncError::RemoteUnavailable {
            path: path.into(),
            source,
        }
    }
}
