//! Remote key-value store surface
//!
//! The controller only needs four primitives from the shared store:
//! `get`, `set`, `push` and `subscribe`, with last-write-wins semantics and
//! change notification. Anything that provides them (a hosted realtime
//! database, the in-process [`MemoryStore`]) can back the state mirror.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::StoreError;

pub mod memory;
pub mod writer;

pub use memory::{MemoryStore, StoreSnapshot};
pub use writer::{FailureCallback, StoreWriter};

/// Stream of values observed on one path
///
/// The current value (if the path holds one) is delivered first, then every
/// subsequent change. Dropping the receiver ends the subscription.
pub type Subscription = mpsc::UnboundedReceiver<Value>;

/// Shared key-value store used to mirror loom state
///
/// Paths are plain `/`-separated keys. Writing `Value::Null` removes a key.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store name for logging (e.g., "memory", "firebase")
    fn name(&self) -> &str;

    /// Read the current value at `path`, `None` if unset
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrite the value at `path` (last write wins)
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Append `value` under a freshly generated child key of `path`
    ///
    /// Returns the generated key.
    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;

    /// Observe `path` for changes
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;
}

/// Join a namespace root and a relative key into a store path
///
/// Leading/trailing slashes are normalized so `"pedals/"` and `"pedals"`
/// behave the same.
pub fn join_path(root: &str, key: &str) -> String {
    let root = root.trim_matches('/');
    let key = key.trim_matches('/');
    match (root.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (false, true) => root.to_string(),
        (false, false) => format!("{}/{}", root, key),
    }
}
