//! SyncNodeArray - one write-only node per pedal
//!
//! The pedal controller reports how many pedals are plugged in and their
//! states; the array mirrors that as `<base>/<index>` entries plus a count
//! entry, and is resized whenever the count changes.

use std::sync::Arc;
use tracing::{debug, info};

use super::{NodeEvent, SyncNode};
use crate::error::SyncError;
use crate::store::{join_path, RemoteStore, StoreWriter};

/// State given to a new slot when the report carries no value for it
pub const DEFAULT_PEDAL_STATE: bool = false;

/// Failure callback shared by every node in the array
pub type FailureObserver = Arc<dyn Fn(SyncError) + Send + Sync>;

/// Dynamically sized array of write-only boolean nodes
pub struct SyncNodeArray {
    store: Arc<dyn RemoteStore>,
    writer: StoreWriter,
    base: String,
    count_node: SyncNode<u64>,
    nodes: Vec<SyncNode<bool>>,
    on_failure: Option<FailureObserver>,
}

impl SyncNodeArray {
    /// `count_path` receives the array length, slots live under `base`
    pub fn new(
        store: Arc<dyn RemoteStore>,
        writer: StoreWriter,
        count_path: impl Into<String>,
        base: impl Into<String>,
    ) -> Self {
        Self {
            count_node: SyncNode::writer(Arc::clone(&store), writer.clone(), count_path, 0),
            store,
            writer,
            base: base.into(),
            nodes: Vec::new(),
            on_failure: None,
        }
    }

    /// Attach the count node (publishes an empty array)
    pub async fn attach(&mut self) {
        self.count_node.attach().await;
    }

    /// Route write failures of the count node and every slot to `observer`
    pub fn on_failure<F>(&mut self, observer: F)
    where
        F: Fn(SyncError) + Send + Sync + 'static,
    {
        let observer: FailureObserver = Arc::new(observer);
        Self::wire(&self.count_node, &observer);
        for node in &self.nodes {
            Self::wire(node, &observer);
        }
        self.on_failure = Some(observer);
    }

    fn wire<T: crate::sync::NodeValue>(node: &SyncNode<T>, observer: &FailureObserver) {
        let observer = Arc::clone(observer);
        node.observe(move |event| {
            if let NodeEvent::RemoteUnavailable(err) = event {
                observer(err);
            }
        });
    }

    /// Number of slots
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    /// Slot states in index order
    pub fn states(&self) -> Vec<bool> {
        self.nodes.iter().map(|node| node.val()).collect()
    }

    pub fn node(&self, id: usize) -> Option<&SyncNode<bool>> {
        self.nodes.get(id)
    }

    /// Replace the whole array
    ///
    /// Slots `0..count` end up holding `states[i]` (or the default when the
    /// report is shorter). New slots are created and attached before the
    /// array is touched, so the length only ever changes in one step.
    pub async fn update_array(&mut self, count: usize, states: &[bool]) {
        let old_count = self.nodes.len();
        let state_at = |i: usize| states.get(i).copied().unwrap_or(DEFAULT_PEDAL_STATE);

        let mut additions = Vec::with_capacity(count.saturating_sub(old_count));
        for id in old_count..count {
            let mut node = SyncNode::writer(
                Arc::clone(&self.store),
                self.writer.clone(),
                join_path(&self.base, &id.to_string()),
                state_at(id),
            );
            if let Some(observer) = &self.on_failure {
                Self::wire(&node, observer);
            }
            node.attach().await;
            additions.push(node);
        }

        for (id, node) in self.nodes.iter().enumerate().take(count) {
            let state = state_at(id);
            if node.val() != state {
                let _ = node.set_val(state);
            }
        }

        // Dropping the stale nodes detaches them
        self.nodes.truncate(count);
        self.nodes.extend(additions);

        if self.count_node.val() != count as u64 {
            let _ = self.count_node.set_val(count as u64);
        }

        if old_count != count {
            info!(old_count, count, "🦶 Pedal array resized");
        } else {
            debug!(count, "Pedal array refreshed");
        }
    }

    /// Write one slot without resizing
    pub fn set_node(&self, id: usize, state: bool) -> Result<(), SyncError> {
        let count = self.nodes.len();
        let node = self
            .nodes
            .get(id)
            .ok_or(SyncError::PedalIndexOutOfRange { id, count })?;
        node.set_val(state)?;
        debug!(id, state, "Pedal state updated");
        Ok(())
    }
}
