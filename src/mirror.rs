//! StateMirror - loom, pedal and weaving-software state as one object
//!
//! Owns every sync node under the namespace root and funnels their
//! notifications into a single `MirrorEvent` channel, so the orchestrator
//! sees remote changes on the same control flow as hardware events.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::SyncError;
use crate::store::{join_path, RemoteStore, StoreWriter};
use crate::sync::{BufferedReadNode, NodeEvent, NodeValue, OnlineStatus, SyncNode, SyncNodeArray};

/// Keys under the namespace root
pub mod paths {
    pub const PI_ONLINE: &str = "pi-online";
    pub const LOOM_ONLINE: &str = "loom-online";
    pub const VACUUM_ON: &str = "vacuum-on";
    pub const NUM_PEDALS: &str = "num-pedals";
    pub const PEDAL_STATES: &str = "pedal-states";
    pub const LOOM_READY: &str = "loom-ready";
    pub const ACTIVE_DRAFT: &str = "active-draft";
    pub const NUM_PICKS: &str = "num-picks";
    pub const PICK_DATA: &str = "pick-data";
    pub const NUM_V_PEDALS: &str = "num-v-pedals";
    pub const V_PEDAL_STATES: &str = "v-pedal-states";
}

/// Default namespace root
pub const DEFAULT_NAMESPACE: &str = "pedals";

/// Remote-side change or failure observed by the mirror
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    /// Weaving software selected/deselected a draft
    ActiveDraft(bool),
    /// New raw row on `pick-data`
    PickData(Value),
    /// Weaving software's pick counter
    NumPicks(u64),
    /// Number of virtual pedals
    VirtualPedalCount(u64),
    /// Virtual pedal pressed/released remotely
    VirtualPedalStates(Value),
    /// A node failed to read/write/subscribe
    RemoteUnavailable(SyncError),
}

/// All nodes representing loom + pedal + software state
pub struct StateMirror {
    namespace: String,
    writer: StoreWriter,

    pi_online: OnlineStatus,
    loom_online: SyncNode<bool>,
    vacuum_on: SyncNode<bool>,
    loom_ready: SyncNode<bool>,

    active_draft: SyncNode<bool>,
    num_picks: SyncNode<u64>,
    pick_data: BufferedReadNode,

    pedal_array: SyncNodeArray,

    num_v_pedals: SyncNode<u64>,
    v_pedal_states: SyncNode<Value>,
}

impl StateMirror {
    /// Build the nodes without attaching them
    pub fn new(
        store: Arc<dyn RemoteStore>,
        namespace: &str,
    ) -> (Self, mpsc::UnboundedReceiver<MirrorEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let writer = StoreWriter::spawn(Arc::clone(&store));
        let path = |key: &str| join_path(namespace, key);

        let pi_online = OnlineStatus::new(Arc::clone(&store), writer.clone(), path(paths::PI_ONLINE));
        let loom_online =
            SyncNode::writer(Arc::clone(&store), writer.clone(), path(paths::LOOM_ONLINE), false);
        let vacuum_on =
            SyncNode::writer(Arc::clone(&store), writer.clone(), path(paths::VACUUM_ON), false);
        let loom_ready =
            SyncNode::writer(Arc::clone(&store), writer.clone(), path(paths::LOOM_READY), false);

        let active_draft =
            SyncNode::reader(Arc::clone(&store), writer.clone(), path(paths::ACTIVE_DRAFT), false);
        let num_picks =
            SyncNode::reader(Arc::clone(&store), writer.clone(), path(paths::NUM_PICKS), 0);
        let pick_data =
            BufferedReadNode::new(Arc::clone(&store), path(paths::PICK_DATA), Value::Bool(false));

        let mut pedal_array = SyncNodeArray::new(
            Arc::clone(&store),
            writer.clone(),
            path(paths::NUM_PEDALS),
            path(paths::PEDAL_STATES),
        );

        let num_v_pedals =
            SyncNode::two_way(Arc::clone(&store), writer.clone(), path(paths::NUM_V_PEDALS), 0);
        let v_pedal_states = SyncNode::two_way(
            Arc::clone(&store),
            writer.clone(),
            path(paths::V_PEDAL_STATES),
            Value::Null,
        );

        let heartbeat_tx = event_tx.clone();
        pi_online.observe(move |event| {
            if let NodeEvent::RemoteUnavailable(e) = event {
                let _ = heartbeat_tx.send(MirrorEvent::RemoteUnavailable(e));
            }
        });
        forward_failures(&loom_online, &event_tx);
        forward_failures(&vacuum_on, &event_tx);
        forward_failures(&loom_ready, &event_tx);
        let array_tx = event_tx.clone();
        pedal_array.on_failure(move |e| {
            let _ = array_tx.send(MirrorEvent::RemoteUnavailable(e));
        });

        forward(&active_draft, &event_tx, MirrorEvent::ActiveDraft);
        forward(&num_picks, &event_tx, MirrorEvent::NumPicks);
        forward(&num_v_pedals, &event_tx, MirrorEvent::VirtualPedalCount);
        forward(&v_pedal_states, &event_tx, MirrorEvent::VirtualPedalStates);

        let pick_tx = event_tx;
        pick_data.observe(move |event| {
            let _ = pick_tx.send(match event {
                NodeEvent::Change(raw) => MirrorEvent::PickData(raw),
                NodeEvent::RemoteUnavailable(e) => MirrorEvent::RemoteUnavailable(e),
            });
        });

        let mirror = Self {
            namespace: namespace.to_string(),
            writer,
            pi_online,
            loom_online,
            vacuum_on,
            loom_ready,
            active_draft,
            num_picks,
            pick_data,
            pedal_array,
            num_v_pedals,
            v_pedal_states,
        };

        (mirror, event_rx)
    }

    /// Build and attach every node
    pub async fn connect(
        store: Arc<dyn RemoteStore>,
        namespace: &str,
    ) -> (Self, mpsc::UnboundedReceiver<MirrorEvent>) {
        let (mut mirror, events) = Self::new(store, namespace);
        mirror.attach().await;
        (mirror, events)
    }

    /// Attach every node; writers publish their defaults
    pub async fn attach(&mut self) {
        self.pi_online.attach().await;

        self.active_draft.attach().await;
        self.num_picks.attach().await;
        self.pick_data.attach().await;

        self.loom_online.attach().await;
        self.vacuum_on.attach().await;
        self.loom_ready.attach().await;
        self.pedal_array.attach().await;

        self.num_v_pedals.attach().await;
        self.v_pedal_states.attach().await;

        info!(namespace = %self.namespace, "🪢 State mirror attached");
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    // =========================================================================
    // Controller → store
    // =========================================================================

    pub fn set_loom_online(&self, online: bool) {
        write(&self.loom_online, online);
    }

    pub fn set_vacuum_on(&self, on: bool) {
        write(&self.vacuum_on, on);
    }

    pub fn set_loom_ready(&self, ready: bool) {
        write(&self.loom_ready, ready);
    }

    pub fn keep_alive(&mut self) {
        self.pi_online.keep_alive();
    }

    pub fn sign_off(&mut self) {
        self.pi_online.sign_off();
    }

    pub fn pedal_array(&self) -> &SyncNodeArray {
        &self.pedal_array
    }

    pub fn pedal_array_mut(&mut self) -> &mut SyncNodeArray {
        &mut self.pedal_array
    }

    // =========================================================================
    // Cached values
    // =========================================================================

    pub fn loom_online(&self) -> bool {
        self.loom_online.val()
    }

    pub fn vacuum_on(&self) -> bool {
        self.vacuum_on.val()
    }

    pub fn loom_ready(&self) -> bool {
        self.loom_ready.val()
    }

    pub fn active_draft(&self) -> bool {
        self.active_draft.val()
    }

    pub fn num_picks(&self) -> u64 {
        self.num_picks.val()
    }

    pub fn num_v_pedals(&self) -> u64 {
        self.num_v_pedals.val()
    }

    pub fn pi_online(&self) -> bool {
        self.pi_online.is_online()
    }

    /// Latest raw pick-data value (marks it consumed)
    pub fn read_pick_data(&self) -> Value {
        self.pick_data.read()
    }

    /// Pick-data that arrived since the last read, if any
    pub fn take_unread_pick_data(&self) -> Option<Value> {
        self.pick_data
            .has_unread()
            .then(|| self.pick_data.read())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Wait until every queued write reached the store
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Stop the writer once queued writes are applied
    pub fn shutdown(&self) {
        self.writer.shutdown();
    }
}

fn write<T: NodeValue>(node: &SyncNode<T>, value: T) {
    if let Err(e) = node.set_val(value) {
        error!(path = %node.path(), error = %e, "Mirror write rejected");
    }
}

fn forward<T: NodeValue>(
    node: &SyncNode<T>,
    tx: &mpsc::UnboundedSender<MirrorEvent>,
    on_change: fn(T) -> MirrorEvent,
) {
    let tx = tx.clone();
    node.observe(move |event| {
        let _ = tx.send(match event {
            NodeEvent::Change(value) => on_change(value),
            NodeEvent::RemoteUnavailable(e) => MirrorEvent::RemoteUnavailable(e),
        });
    });
}

fn forward_failures<T: NodeValue>(node: &SyncNode<T>, tx: &mpsc::UnboundedSender<MirrorEvent>) {
    let tx = tx.clone();
    node.observe(move |event| {
        if let NodeEvent::RemoteUnavailable(e) = event {
            let _ = tx.send(MirrorEvent::RemoteUnavailable(e));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    async fn next(rx: &mut mpsc::UnboundedReceiver<MirrorEvent>) -> MirrorEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for mirror event")
            .expect("mirror channel closed")
    }

    #[tokio::test]
    async fn test_connect_publishes_defaults() {
        let store = Arc::new(MemoryStore::new());
        let (mirror, _events) = StateMirror::connect(store.clone(), "pedals/").await;
        mirror.flush().await;

        assert_eq!(store.value("pedals/pi-online"), Some(json!(true)));
        assert_eq!(store.value("pedals/loom-online"), Some(json!(false)));
        assert_eq!(store.value("pedals/vacuum-on"), Some(json!(false)));
        assert_eq!(store.value("pedals/loom-ready"), Some(json!(false)));
        assert_eq!(store.value("pedals/num-pedals"), Some(json!(0)));
        // Readers never write
        assert_eq!(store.value("pedals/active-draft"), None);
        assert_eq!(store.value("pedals/pick-data"), None);
    }

    #[tokio::test]
    async fn test_remote_changes_arrive_as_events() {
        let store = Arc::new(MemoryStore::new());
        let (mirror, mut events) = StateMirror::connect(store.clone(), "pedals").await;

        store.set("pedals/active-draft", json!(true)).await.unwrap();
        assert_eq!(next(&mut events).await, MirrorEvent::ActiveDraft(true));
        assert!(mirror.active_draft());

        store.set("pedals/pick-data", json!("1100")).await.unwrap();
        assert_eq!(next(&mut events).await, MirrorEvent::PickData(json!("1100")));
        assert_eq!(mirror.read_pick_data(), json!("1100"));

        store.set("pedals/num-picks", json!(4)).await.unwrap();
        assert_eq!(next(&mut events).await, MirrorEvent::NumPicks(4));

        store
            .set("pedals/v-pedal-states", json!([true]))
            .await
            .unwrap();
        assert_eq!(
            next(&mut events).await,
            MirrorEvent::VirtualPedalStates(json!([true]))
        );
    }

    #[tokio::test]
    async fn test_unread_pick_data_is_taken_once() {
        let store = Arc::new(MemoryStore::new());
        let (mirror, mut events) = StateMirror::connect(store.clone(), "pedals").await;
        assert_eq!(mirror.take_unread_pick_data(), None);

        store.set("pedals/pick-data", json!("01")).await.unwrap();
        next(&mut events).await;

        assert_eq!(mirror.take_unread_pick_data(), Some(json!("01")));
        assert_eq!(mirror.take_unread_pick_data(), None);
        assert_eq!(mirror.read_pick_data(), json!("01"));
    }

    #[tokio::test]
    async fn test_writer_setters_reach_store() {
        let store = Arc::new(MemoryStore::new());
        let (mirror, _events) = StateMirror::connect(store.clone(), "pedals").await;

        mirror.set_loom_online(true);
        mirror.set_vacuum_on(true);
        mirror.set_loom_ready(true);
        mirror.flush().await;

        assert!(mirror.loom_ready());
        assert_eq!(store.value("pedals/loom-online"), Some(json!(true)));
        assert_eq!(store.value("pedals/vacuum-on"), Some(json!(true)));
        assert_eq!(store.value("pedals/loom-ready"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_as_event() {
        let store = Arc::new(MemoryStore::new());
        let (mirror, mut events) = StateMirror::connect(store.clone(), "pedals").await;
        mirror.flush().await;

        store.set_online(false);
        mirror.set_loom_ready(true);

        assert!(matches!(
            next(&mut events).await,
            MirrorEvent::RemoteUnavailable(SyncError::RemoteUnavailable { .. })
        ));
        // Last known value kept
        assert!(mirror.loom_ready());
    }
}
