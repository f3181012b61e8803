//! SyncNode - one typed binding onto one store path
//!
//! The same type covers the three directions; the direction decides whether
//! `attach` subscribes, whether `set_val` is allowed, and whether remote
//! values are checked against this node's own pending writes.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{spawn_listener, Direction, NodeEvent, NodeValue, Observer};
use crate::error::{StoreError, SyncError};
use crate::store::{RemoteStore, StoreWriter};

/// Upper bound on remembered own writes awaiting their echo
const MAX_PENDING_ECHOES: usize = 32;

/// State shared between the node and its subscription task
struct NodeShared<T> {
    path: String,
    direction: Direction,
    local: RwLock<T>,
    /// Values this node wrote that the store has not echoed back yet
    pending_echoes: Mutex<VecDeque<T>>,
    observers: RwLock<Vec<Observer<T>>>,
}

impl<T: NodeValue> NodeShared<T> {
    fn emit(&self, event: NodeEvent<T>) {
        let observers = self.observers.read().clone();
        for observer in observers.iter() {
            observer(event.clone());
        }
    }

    fn fail(&self, err: StoreError) {
        if self.direction == Direction::TwoWay {
            self.pending_echoes.lock().clear();
        }
        self.emit(NodeEvent::RemoteUnavailable(SyncError::remote(
            self.path.clone(),
            err,
        )));
    }

    fn on_remote(&self, raw: Value) {
        let value: T = match serde_json::from_value(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.path, error = %e, "Ignoring remote value of unexpected shape");
                return;
            }
        };

        if self.direction == Direction::TwoWay {
            let mut pending = self.pending_echoes.lock();
            if let Some(pos) = pending.iter().position(|p| *p == value) {
                pending.drain(..=pos);
                trace!(path = %self.path, ?value, "Absorbed echo of own write");
                return;
            }
            // Anything still pending was overwritten remotely
            pending.clear();
        }

        {
            let mut local = self.local.write();
            if *local == value {
                return;
            }
            *local = value.clone();
        }

        debug!(path = %self.path, ?value, "Remote change");
        self.emit(NodeEvent::Change(value));
    }
}

/// Typed binding onto a single store path
pub struct SyncNode<T: NodeValue> {
    path: String,
    direction: Direction,
    initial: T,
    shared: Arc<NodeShared<T>>,
    store: Arc<dyn RemoteStore>,
    writer: StoreWriter,
    listener: Option<JoinHandle<()>>,
    attached: bool,
}

impl<T: NodeValue> SyncNode<T> {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        writer: StoreWriter,
        path: impl Into<String>,
        direction: Direction,
        initial: T,
    ) -> Self {
        let path = path.into();
        Self {
            shared: Arc::new(NodeShared {
                path: path.clone(),
                direction,
                local: RwLock::new(initial.clone()),
                pending_echoes: Mutex::new(VecDeque::new()),
                observers: RwLock::new(Vec::new()),
            }),
            path,
            direction,
            initial,
            store,
            writer,
            listener: None,
            attached: false,
        }
    }

    /// Remote → local binding
    pub fn reader(
        store: Arc<dyn RemoteStore>,
        writer: StoreWriter,
        path: impl Into<String>,
        initial: T,
    ) -> Self {
        Self::new(store, writer, path, Direction::ReadOnly, initial)
    }

    /// Local → remote binding
    pub fn writer(
        store: Arc<dyn RemoteStore>,
        writer: StoreWriter,
        path: impl Into<String>,
        initial: T,
    ) -> Self {
        Self::new(store, writer, path, Direction::WriteOnly, initial)
    }

    /// Bidirectional binding
    pub fn two_way(
        store: Arc<dyn RemoteStore>,
        writer: StoreWriter,
        path: impl Into<String>,
        initial: T,
    ) -> Self {
        Self::new(store, writer, path, Direction::TwoWay, initial)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Locally cached value
    pub fn val(&self) -> T {
        self.shared.local.read().clone()
    }

    /// Register an observer for changes and failures on this node
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(NodeEvent<T>) + Send + Sync + 'static,
    {
        self.shared.observers.write().push(Arc::new(observer));
    }

    /// Establish the remote binding
    ///
    /// Readers subscribe; write-only nodes push their initial value. Calling
    /// this on an attached node does nothing. A failed subscription is
    /// reported to observers and leaves the node detached so a later call
    /// can retry.
    pub async fn attach(&mut self) {
        if self.attached {
            trace!(path = %self.path, "Node already attached");
            return;
        }

        if self.direction.reads() {
            match self.store.subscribe(&self.path).await {
                Ok(subscription) => {
                    let shared = Arc::clone(&self.shared);
                    self.listener = Some(spawn_listener(subscription, move |value| {
                        shared.on_remote(value)
                    }));
                }
                Err(e) => {
                    warn!(path = %self.path, error = %e, "Failed to subscribe");
                    self.shared.fail(e);
                    return;
                }
            }
        }

        if self.direction == Direction::WriteOnly {
            *self.shared.local.write() = self.initial.clone();
            self.push(self.initial.clone());
        }

        self.attached = true;
        debug!(path = %self.path, direction = %self.direction, "Node attached");
    }

    /// Drop the remote subscription; the cached value is kept
    pub fn detach(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if self.attached {
            debug!(path = %self.path, "Node detached");
        }
        self.attached = false;
    }

    /// Write a new value
    ///
    /// The local value changes immediately; the remote write is queued and
    /// not awaited. Observers are not notified of local writes.
    pub fn set_val(&self, value: T) -> Result<(), SyncError> {
        if !self.direction.writes() {
            return Err(SyncError::ReadOnly(self.path.clone()));
        }

        *self.shared.local.write() = value.clone();

        if self.direction == Direction::TwoWay {
            let mut pending = self.shared.pending_echoes.lock();
            if pending.len() >= MAX_PENDING_ECHOES {
                pending.pop_front();
            }
            pending.push_back(value.clone());
        }

        self.push(value);
        Ok(())
    }

    fn push(&self, value: T) {
        let encoded = match serde_json::to_value(&value) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.shared.fail(StoreError::Encode {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        let shared = Arc::clone(&self.shared);
        self.writer.set(
            self.path.clone(),
            encoded,
            Some(Arc::new(move |e: StoreError| shared.fail(e))),
        );
    }
}

impl<T: NodeValue> Drop for SyncNode<T> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<MemoryStore>, StoreWriter) {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(store.clone());
        (store, writer)
    }

    fn collect<T: NodeValue>(node: &SyncNode<T>) -> mpsc::UnboundedReceiver<NodeEvent<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        node.observe(move |event| {
            let _ = tx.send(event);
        });
        rx
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<NodeEvent<T>>) -> NodeEvent<T> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for node event")
            .expect("observer channel closed")
    }

    async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<NodeEvent<T>>) {
        let res = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(res.is_err(), "unexpected node event: {:?}", res);
    }

    #[tokio::test]
    async fn test_writer_attach_pushes_initial_value() {
        let (store, writer) = setup();
        let mut node = SyncNode::writer(store.clone(), writer.clone(), "pedals/loom-ready", false);

        node.attach().await;
        writer.flush().await;

        assert!(node.is_attached());
        assert_eq!(store.value("pedals/loom-ready"), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_writer_set_val_is_local_immediately() {
        let (store, writer) = setup();
        let mut node = SyncNode::writer(store.clone(), writer.clone(), "pedals/vacuum-on", false);
        node.attach().await;

        node.set_val(true).unwrap();
        assert!(node.val());

        writer.flush().await;
        assert_eq!(store.value("pedals/vacuum-on"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_writer_ignores_remote_changes() {
        let (store, writer) = setup();
        let mut node = SyncNode::writer(store.clone(), writer.clone(), "pedals/loom-online", true);
        let mut events = collect(&node);
        node.attach().await;
        writer.flush().await;

        store.set("pedals/loom-online", json!(false)).await.unwrap();

        assert_quiet(&mut events).await;
        assert!(node.val());
    }

    #[tokio::test]
    async fn test_reader_emits_once_per_transition() {
        let (store, writer) = setup();
        let mut node = SyncNode::reader(store.clone(), writer, "pedals/active-draft", false);
        let mut events = collect(&node);
        node.attach().await;

        store.set("pedals/active-draft", json!(true)).await.unwrap();
        assert_eq!(next(&mut events).await, NodeEvent::Change(true));
        assert!(node.val());

        // Same value again is not a transition
        store.set("pedals/active-draft", json!(true)).await.unwrap();
        store.set("pedals/active-draft", json!(false)).await.unwrap();
        assert_eq!(next(&mut events).await, NodeEvent::Change(false));
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_reader_initial_remote_value_counts_as_change() {
        let (store, writer) = setup();
        store.set("pedals/num-picks", json!(7)).await.unwrap();

        let mut node: SyncNode<u64> = SyncNode::reader(store.clone(), writer, "pedals/num-picks", 0);
        let mut events = collect(&node);
        node.attach().await;

        assert_eq!(next(&mut events).await, NodeEvent::Change(7));
    }

    #[tokio::test]
    async fn test_reader_never_writes() {
        let (store, writer) = setup();
        let mut node = SyncNode::reader(store.clone(), writer.clone(), "pedals/active-draft", false);
        node.attach().await;

        assert_eq!(
            node.set_val(true),
            Err(SyncError::ReadOnly("pedals/active-draft".to_string()))
        );
        writer.flush().await;
        assert_eq!(store.value("pedals/active-draft"), None);
    }

    #[tokio::test]
    async fn test_attach_is_idempotent() {
        let (store, writer) = setup();
        let mut node = SyncNode::reader(store.clone(), writer, "pedals/active-draft", false);

        node.attach().await;
        node.attach().await;

        assert_eq!(store.subscriber_count("pedals/active-draft"), 1);
    }

    #[tokio::test]
    async fn test_detach_stops_following() {
        let (store, writer) = setup();
        let mut node = SyncNode::reader(store.clone(), writer, "pedals/active-draft", false);
        let mut events = collect(&node);
        node.attach().await;

        node.detach();
        tokio::task::yield_now().await;
        store.set("pedals/active-draft", json!(true)).await.unwrap();

        assert_quiet(&mut events).await;
        assert!(!node.val());
        assert!(!node.is_attached());
    }

    #[tokio::test]
    async fn test_two_way_absorbs_own_echo() {
        let (store, writer) = setup();
        let mut node = SyncNode::two_way(
            store.clone(),
            writer.clone(),
            "pedals/v-pedal-states",
            json!(null),
        );
        let mut events = collect(&node);
        node.attach().await;

        node.set_val(json!([true, false])).unwrap();
        writer.flush().await;
        assert_eq!(store.value("pedals/v-pedal-states"), Some(json!([true, false])));
        assert_quiet(&mut events).await;

        store
            .set("pedals/v-pedal-states", json!([false, false]))
            .await
            .unwrap();
        assert_eq!(next(&mut events).await, NodeEvent::Change(json!([false, false])));
    }

    #[tokio::test]
    async fn test_two_way_remote_value_matching_stale_write_is_reported() {
        let (store, writer) = setup();
        store.set("pedals/num-v-pedals", json!(2)).await.unwrap();

        let mut node: SyncNode<u64> =
            SyncNode::two_way(store.clone(), writer.clone(), "pedals/num-v-pedals", 0);
        let mut events = collect(&node);
        node.attach().await;
        assert_eq!(next(&mut events).await, NodeEvent::Change(2));

        // Writing the value the store already holds produces no echo
        node.set_val(2).unwrap();
        writer.flush().await;

        store.set("pedals/num-v-pedals", json!(3)).await.unwrap();
        assert_eq!(next(&mut events).await, NodeEvent::Change(3));
        store.set("pedals/num-v-pedals", json!(2)).await.unwrap();
        assert_eq!(next(&mut events).await, NodeEvent::Change(2));
    }

    #[tokio::test]
    async fn test_subscribe_failure_reports_remote_unavailable() {
        let (store, writer) = setup();
        store.set_online(false);

        let mut node = SyncNode::reader(store.clone(), writer, "pedals/active-draft", false);
        let mut events = collect(&node);
        node.attach().await;

        assert!(matches!(
            next(&mut events).await,
            NodeEvent::RemoteUnavailable(SyncError::RemoteUnavailable { .. })
        ));
        assert!(!node.is_attached());

        // Retry once the store is back
        store.set_online(true);
        node.attach().await;
        assert!(node.is_attached());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_local_value() {
        let (store, writer) = setup();
        let mut node = SyncNode::writer(store.clone(), writer.clone(), "pedals/loom-ready", false);
        let mut events = collect(&node);
        node.attach().await;
        writer.flush().await;

        store.set_online(false);
        node.set_val(true).unwrap();
        writer.flush().await;

        assert!(matches!(
            next(&mut events).await,
            NodeEvent::RemoteUnavailable(_)
        ));
        assert!(node.val());
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_ignored() {
        let (store, writer) = setup();
        let mut node = SyncNode::reader(store.clone(), writer, "pedals/active-draft", false);
        let mut events = collect(&node);
        node.attach().await;

        store.set("pedals/active-draft", json!("yes")).await.unwrap();
        assert_quiet(&mut events).await;
        assert!(!node.val());
    }
}
