//! MemoryStore - In-process key-value store with change subscriptions
//!
//! Stands in for the hosted realtime database on the bench and in tests.
//! Notifies subscribers only when a value actually changes, which is the
//! same contract the hosted store gives its listeners.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{join_path, RemoteStore, Subscription};
use crate::error::StoreError;

type SubscriberMap = HashMap<String, Vec<mpsc::UnboundedSender<Value>>>;

/// In-memory store, last write wins
pub struct MemoryStore {
    data: DashMap<String, Value>,
    /// Guarded separately so that a write and its notifications are ordered
    /// with respect to new subscriptions on the same path
    subscribers: Mutex<SubscriberMap>,
    online: AtomicBool,
    push_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            subscribers: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            push_seq: AtomicU64::new(0),
        }
    }

    /// Simulate losing/regaining the connection to the store
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        debug!(online, "MemoryStore connectivity changed");
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Current value without going through the async surface
    pub fn value(&self, path: &str) -> Option<Value> {
        self.data.get(path).map(|v| v.value().clone())
    }

    /// Number of live subscriptions on a path
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.subscribers
            .lock()
            .get(path)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    fn write(&self, path: &str, value: Value) {
        let mut subscribers = self.subscribers.lock();

        let changed = if value.is_null() {
            self.data.remove(path).is_some()
        } else {
            match self.data.insert(path.to_string(), value.clone()) {
                Some(previous) => previous != value,
                None => true,
            }
        };

        if !changed {
            trace!(path, "MemoryStore write without change");
            return;
        }

        if let Some(subs) = subscribers.get_mut(path) {
            subs.retain(|tx| tx.send(value.clone()).is_ok());
        }
        trace!(path, %value, "MemoryStore value changed");
    }

    /// Replace the contents with a snapshot without notifying subscribers
    pub fn hydrate(&self, entries: BTreeMap<String, Value>) {
        let _subscribers = self.subscribers.lock();
        self.data.clear();
        for (path, value) in entries {
            if !value.is_null() {
                self.data.insert(path, value);
            }
        }
    }

    /// Save current contents to a JSON file
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        StoreSnapshot::from_store(self).save_to_file(path).await
    }

    /// Load contents from a JSON file
    pub async fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = StoreSnapshot::load_from_file(path).await?;
        debug!(entries = snapshot.entries.len(), "Hydrating MemoryStore from snapshot");
        self.hydrate(snapshot.entries);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.check_online()?;
        Ok(self.value(path))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.check_online()?;
        self.write(path, value);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        self.check_online()?;
        let seq = self.push_seq.fetch_add(1, Ordering::SeqCst);
        // Millisecond prefix keeps generated keys in insertion order
        let key = format!("{}-{:06}", chrono::Utc::now().timestamp_millis(), seq);
        self.write(&join_path(path, &key), value);
        Ok(key)
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        self.check_online()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subscribers = self.subscribers.lock();
        if let Some(current) = self.value(path) {
            let _ = tx.send(current);
        }
        subscribers.entry(path.to_string()).or_default().push(tx);

        debug!(path, "MemoryStore subscription added");
        Ok(rx)
    }
}

/// Store snapshot for JSON serialization
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct StoreSnapshot {
    /// Timestamp of snapshot creation (RFC 3339)
    pub timestamp: String,
    /// Version of the snapshot format
    pub version: String,
    /// Every stored path and its value
    pub entries: BTreeMap<String, Value>,
}

impl StoreSnapshot {
    /// Current snapshot format version
    pub const VERSION: &'static str = "1.0.0";

    pub fn from_store(store: &MemoryStore) -> Self {
        let entries = store
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            version: Self::VERSION.to_string(),
            entries,
        }
    }

    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize store snapshot")?;

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write store snapshot: {}", path.display()))?;

        Ok(())
    }

    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read store snapshot: {}", path.display()))?;

        let snapshot: StoreSnapshot =
            serde_json::from_str(&json).context("Failed to parse store snapshot JSON")?;

        debug!(
            "Store snapshot loaded (version: {}, timestamp: {})",
            snapshot.version, snapshot.timestamp
        );

        Ok(snapshot)
    }
}
