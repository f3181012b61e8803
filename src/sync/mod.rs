//! Sync nodes - typed, directional bindings onto single store paths
//!
//! A node caches the value of one path locally and either follows remote
//! changes (readers), pushes local changes (writers), or both (two-way).
//! Observers are plain callbacks, the same shape the driver layer uses for
//! indicator and status callbacks.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::store::Subscription;

pub mod array;
pub mod buffer;
pub mod heartbeat;
pub mod node;

pub use array::SyncNodeArray;
pub use buffer::BufferedReadNode;
pub use heartbeat::OnlineStatus;
pub use node::SyncNode;

/// Values a node can carry
pub trait NodeValue:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
}

impl<T> NodeValue for T where
    T: Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
}

/// Which way data flows through a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote → local; never writes
    ReadOnly,
    /// Local → remote; ignores remote changes
    WriteOnly,
    /// Both ways, with echo suppression for its own writes
    TwoWay,
}

impl Direction {
    pub fn reads(self) -> bool {
        matches!(self, Direction::ReadOnly | Direction::TwoWay)
    }

    pub fn writes(self) -> bool {
        matches!(self, Direction::WriteOnly | Direction::TwoWay)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ReadOnly => write!(f, "read-only"),
            Direction::WriteOnly => write!(f, "write-only"),
            Direction::TwoWay => write!(f, "two-way"),
        }
    }
}

/// Notification delivered to node observers
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent<T> {
    /// The remote value moved to a new value
    Change(T),
    /// A read/write/subscribe on this node failed
    RemoteUnavailable(SyncError),
}

/// Observer callback type
pub type Observer<T> = Arc<dyn Fn(NodeEvent<T>) + Send + Sync>;

/// Forward every value of `subscription` to `on_value` on a background task
///
/// Values are handled one at a time in arrival order. The task ends when
/// the store drops the subscription or the handle is aborted.
pub(crate) fn spawn_listener<F>(mut subscription: Subscription, on_value: F) -> JoinHandle<()>
where
    F: Fn(Value) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(value) = subscription.recv().await {
            on_value(value);
        }
    })
}
