//! OnlineStatus - liveness heartbeat for the controller
//!
//! Remote observers infer that the controller is alive from how recently
//! this key was written, so it is asserted on attach and re-asserted by the
//! keep-alive tick.

use std::sync::Arc;
use tracing::{debug, info};

use super::{NodeEvent, SyncNode};
use crate::store::{RemoteStore, StoreWriter};

/// Write-only heartbeat node
pub struct OnlineStatus {
    node: SyncNode<bool>,
    beats: u64,
}

impl OnlineStatus {
    pub fn new(store: Arc<dyn RemoteStore>, writer: StoreWriter, path: impl Into<String>) -> Self {
        Self {
            node: SyncNode::writer(store, writer, path, true),
            beats: 0,
        }
    }

    /// Attach and assert liveness once
    pub async fn attach(&mut self) {
        if self.node.is_attached() {
            return;
        }
        self.node.attach().await;
        self.beats = 1;
        info!(path = %self.node.path(), "💓 Online status asserted");
    }

    /// Re-assert liveness
    pub fn keep_alive(&mut self) {
        // Writer nodes always accept writes
        let _ = self.node.set_val(true);
        self.beats += 1;
        debug!(beats = self.beats, "Stayin' alive");
    }

    /// Mark the controller offline (clean shutdown)
    pub fn sign_off(&mut self) {
        let _ = self.node.set_val(false);
        info!(path = %self.node.path(), "Online status cleared");
    }

    pub fn is_online(&self) -> bool {
        self.node.val()
    }

    /// Number of assertions since attach
    pub fn beats(&self) -> u64 {
        self.beats
    }

    pub fn path(&self) -> &str {
        self.node.path()
    }

    /// Forward write failures
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(NodeEvent<bool>) + Send + Sync + 'static,
    {
        self.node.observe(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_attach_asserts_once() {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone());
        let mut status = OnlineStatus::new(store.clone(), writer.clone(), "pedals/pi-online");

        status.attach().await;
        status.attach().await;
        writer.flush().await;

        assert_eq!(status.beats(), 1);
        assert_eq!(store.value("pedals/pi-online"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_keep_alive_reasserts_after_remote_clear() {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone());
        let mut status = OnlineStatus::new(store.clone(), writer.clone(), "pedals/pi-online");
        status.attach().await;
        writer.flush().await;

        // Remote side marks the controller stale
        store.set("pedals/pi-online", json!(false)).await.unwrap();

        status.keep_alive();
        writer.flush().await;

        assert_eq!(status.beats(), 2);
        assert_eq!(store.value("pedals/pi-online"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_sign_off() {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone());
        let mut status = OnlineStatus::new(store.clone(), writer.clone(), "pedals/pi-online");
        status.attach().await;

        status.sign_off();
        writer.flush().await;

        assert!(!status.is_online());
        assert_eq!(store.value("pedals/pi-online"), Some(json!(false)));
    }
}
