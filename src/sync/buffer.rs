//! BufferedReadNode - read-only node that keeps the latest raw value
//!
//! Used for pick data: rows arrive as raw store values and are only decoded
//! when the orchestrator needs them, so the node keeps the value untouched
//! and remembers whether it has been consumed.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{spawn_listener, NodeEvent, Observer};
use crate::error::{StoreError, SyncError};
use crate::store::RemoteStore;

struct BufferShared {
    path: String,
    latest: RwLock<Value>,
    unread: AtomicBool,
    observers: RwLock<Vec<Observer<Value>>>,
}

impl BufferShared {
    fn emit(&self, event: NodeEvent<Value>) {
        let observers = self.observers.read().clone();
        for observer in observers.iter() {
            observer(event.clone());
        }
    }

    fn fail(&self, err: StoreError) {
        self.emit(NodeEvent::RemoteUnavailable(SyncError::remote(
            self.path.clone(),
            err,
        )));
    }

    fn on_remote(&self, raw: Value) {
        *self.latest.write() = raw.clone();
        self.unread.store(true, Ordering::SeqCst);
        trace!(path = %self.path, value = %raw, "Buffered remote value");
        self.emit(NodeEvent::Change(raw));
    }
}

/// Read-only node retaining the latest raw value until consumed
pub struct BufferedReadNode {
    path: String,
    initial: Value,
    shared: Arc<BufferShared>,
    store: Arc<dyn RemoteStore>,
    listener: Option<JoinHandle<()>>,
    attached: bool,
}

impl BufferedReadNode {
    pub fn new(store: Arc<dyn RemoteStore>, path: impl Into<String>, initial: Value) -> Self {
        let path = path.into();
        Self {
            shared: Arc::new(BufferShared {
                path: path.clone(),
                latest: RwLock::new(initial.clone()),
                unread: AtomicBool::new(false),
                observers: RwLock::new(Vec::new()),
            }),
            path,
            initial,
            store,
            listener: None,
            attached: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Latest buffered raw value; marks it consumed
    pub fn read(&self) -> Value {
        self.shared.unread.store(false, Ordering::SeqCst);
        self.shared.latest.read().clone()
    }

    /// Latest buffered raw value without consuming it
    pub fn peek(&self) -> Value {
        self.shared.latest.read().clone()
    }

    /// True if a value arrived since the last `read`
    pub fn has_unread(&self) -> bool {
        self.shared.unread.load(Ordering::SeqCst)
    }

    /// Register an observer; `Change` fires for every value that arrives
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(NodeEvent<Value>) + Send + Sync + 'static,
    {
        self.shared.observers.write().push(Arc::new(observer));
    }

    /// Subscribe to the path; idempotent
    pub async fn attach(&mut self) {
        if self.attached {
            return;
        }

        match self.store.subscribe(&self.path).await {
            Ok(subscription) => {
                let shared = Arc::clone(&self.shared);
                self.listener = Some(spawn_listener(subscription, move |value| {
                    shared.on_remote(value)
                }));
                self.attached = true;
                debug!(path = %self.path, "Buffered node attached");
            }
            Err(e) => {
                warn!(path = %self.path, error = %e, "Failed to subscribe");
                self.shared.fail(e);
            }
        }
    }

    pub fn detach(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.attached = false;
    }
}

impl Drop for BufferedReadNode {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
