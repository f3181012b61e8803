//! Draft player - bench stand-in for the remote weaving software
//!
//! Publishes a draft one row at a time through the store, the way the
//! weaving software does: the first row and `active-draft` go out up front,
//! every `loom-ready` afterwards publishes the next row, and the draft is
//! deactivated once the last row has been taken.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DraftConfig;
use crate::mirror::paths;
use crate::store::{join_path, RemoteStore};

pub struct DraftPlayer {
    store: Arc<dyn RemoteStore>,
    namespace: String,
    rows: Vec<String>,
    repeat: bool,
}

impl DraftPlayer {
    pub fn new(store: Arc<dyn RemoteStore>, namespace: &str, config: &DraftConfig) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            rows: config.rows.clone(),
            repeat: config.repeat,
        }
    }

    fn path(&self, key: &str) -> String {
        join_path(&self.namespace, key)
    }

    async fn write(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path(key);
        self.store
            .set(&path, value)
            .await
            .with_context(|| format!("Failed to write {}", path))
    }

    /// Play the draft; returns the number of rows published
    ///
    /// Ends when the last row was requested (never with `repeat`) or the
    /// `loom-ready` subscription closes.
    pub async fn run(self) -> Result<usize> {
        if self.rows.is_empty() {
            warn!("Draft has no rows, nothing to play");
            return Ok(0);
        }

        let mut ready = self
            .store
            .subscribe(&self.path(paths::LOOM_READY))
            .await
            .context("Failed to subscribe to loom readiness")?;

        self.write(paths::NUM_PICKS, json!(self.rows.len())).await?;
        self.write(paths::PICK_DATA, json!(self.rows[0])).await?;
        self.write(paths::ACTIVE_DRAFT, json!(true)).await?;
        info!(rows = self.rows.len(), repeat = self.repeat, "📜 Draft activated");

        let mut index = 0;
        let mut published = 1;

        while let Some(value) = ready.recv().await {
            if value != Value::Bool(true) {
                continue;
            }

            index += 1;
            if index == self.rows.len() {
                if !self.repeat {
                    break;
                }
                index = 0;
                info!("🔁 Draft repeating");
            }

            debug!(index, row = %self.rows[index], "Publishing next row");
            self.write(paths::PICK_DATA, json!(self.rows[index])).await?;
            published += 1;
        }

        self.write(paths::ACTIVE_DRAFT, json!(false)).await?;
        info!(published, "✅ Draft finished");
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{LoomDriver, SimulatedLoom, SimulationConfig, SimulatedPedals};
    use crate::mirror::StateMirror;
    use crate::orchestrator::WeaveOrchestrator;
    use crate::pick::decode_str;
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    fn draft(rows: &[&str], repeat: bool) -> DraftConfig {
        DraftConfig {
            rows: rows.iter().map(|r| r.to_string()).collect(),
            repeat,
        }
    }

    async fn wait_for(store: &MemoryStore, path: &str, expected: Value) {
        for _ in 0..500 {
            if store.value(path).as_ref() == Some(&expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("{} never became {}", path, expected);
    }

    #[tokio::test]
    async fn test_empty_draft_publishes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let player = DraftPlayer::new(store.clone(), "pedals", &draft(&[], false));

        assert_eq!(player.run().await.unwrap(), 0);
        assert_eq!(store.value("pedals/active-draft"), None);
    }

    #[tokio::test]
    async fn test_rows_advance_on_loom_ready() {
        let store = Arc::new(MemoryStore::new());
        let player = DraftPlayer::new(store.clone(), "pedals", &draft(&["10", "01"], false));
        let task = tokio::spawn(player.run());

        wait_for(&store, "pedals/active-draft", json!(true)).await;
        assert_eq!(store.value("pedals/pick-data"), Some(json!("10")));
        assert_eq!(store.value("pedals/num-picks"), Some(json!(2)));

        store.set("pedals/loom-ready", json!(true)).await.unwrap();
        wait_for(&store, "pedals/pick-data", json!("01")).await;

        store.set("pedals/loom-ready", json!(false)).await.unwrap();
        store.set("pedals/loom-ready", json!(true)).await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), 2);
        assert_eq!(store.value("pedals/active-draft"), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_repeat_wraps_around() {
        let store = Arc::new(MemoryStore::new());
        let player = DraftPlayer::new(store.clone(), "pedals", &draft(&["1", "0"], true));
        let task = tokio::spawn(player.run());
        wait_for(&store, "pedals/active-draft", json!(true)).await;

        for expected in ["0", "1", "0"] {
            store.set("pedals/loom-ready", json!(true)).await.unwrap();
            wait_for(&store, "pedals/pick-data", json!(expected)).await;
            store.set("pedals/loom-ready", json!(false)).await.unwrap();
        }

        assert_eq!(store.value("pedals/active-draft"), Some(json!(true)));
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_draft_weaves_every_row_once() {
        let store = Arc::new(MemoryStore::new());
        let (loom_tx, loom_rx) = mpsc::channel(32);
        let (pedal_tx, pedal_rx) = mpsc::channel(32);
        let loom = Arc::new(SimulatedLoom::new(SimulationConfig::default(), loom_tx));
        let pedals = Arc::new(SimulatedPedals::new(SimulationConfig::default(), pedal_tx));
        let (mirror, mirror_rx) = StateMirror::connect(store.clone(), "pedals").await;

        let orchestrator = WeaveOrchestrator::new(mirror, loom.clone(), pedals);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let weaving = tokio::spawn(orchestrator.run(
            loom_rx,
            pedal_rx,
            mirror_rx,
            Duration::from_secs(5),
            async move {
                let _ = stop_rx.await;
            },
        ));
        loom.init().await.unwrap();

        let player = DraftPlayer::new(store.clone(), "pedals", &draft(&["10", "01", "11"], false));
        let published = tokio::time::timeout(Duration::from_secs(60), player.run())
            .await
            .expect("draft never finished")
            .unwrap();

        assert_eq!(published, 3);
        assert_eq!(
            loom.sent_picks(),
            vec![decode_str("10"), decode_str("01"), decode_str("11")]
        );

        stop_tx.send(()).unwrap();
        weaving.await.unwrap();
        assert_eq!(store.value("pedals/loom-online"), Some(json!(false)));
    }
}
