//! Simulated loom and pedal drivers
//!
//! Useful for:
//! - Bench runs without a loom or relay board attached
//! - Exercising the weaving handshake end to end against the memory store
//! - Tests that need to inspect which commands were issued

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{LoomDriver, LoomEvent, PedalDriver, PedalEvent};
use crate::pick::Pick;

/// Timing of the simulated hardware
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Answer commands with the events a real loom would send
    #[serde(default = "default_true")]
    pub auto_respond: bool,
    /// Delay before a vacuum-on is confirmed
    #[serde(default = "default_vacuum_delay_ms")]
    pub vacuum_delay_ms: u64,
    /// Delay between receiving a pick and requesting the next one
    #[serde(default = "default_pick_delay_ms")]
    pub pick_delay_ms: u64,
    /// Pedals reported on init
    #[serde(default = "default_pedals")]
    pub pedals: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            auto_respond: default_true(),
            vacuum_delay_ms: default_vacuum_delay_ms(),
            pick_delay_ms: default_pick_delay_ms(),
            pedals: default_pedals(),
        }
    }
}

impl SimulationConfig {
    /// Record commands only, never answer
    pub fn silent() -> Self {
        Self {
            auto_respond: false,
            ..Self::default()
        }
    }
}

fn default_true() -> bool { true }
fn default_vacuum_delay_ms() -> u64 { 200 }
fn default_pick_delay_ms() -> u64 { 1500 }
fn default_pedals() -> usize { 4 }

/// Command received by the simulated loom
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoomCommand {
    VacuumOn,
    VacuumOff,
    SendPick(Pick),
}

/// Loom stand-in that records commands and answers like the real one
pub struct SimulatedLoom {
    name: String,
    config: SimulationConfig,
    event_tx: mpsc::Sender<LoomEvent>,
    connected: AtomicBool,
    pick_number: AtomicU64,
    commands: Mutex<Vec<LoomCommand>>,
}

impl SimulatedLoom {
    pub fn new(config: SimulationConfig, event_tx: mpsc::Sender<LoomEvent>) -> Self {
        Self {
            name: "sim-loom".to_string(),
            config,
            event_tx,
            connected: AtomicBool::new(false),
            pick_number: AtomicU64::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Every command received so far
    pub fn commands(&self) -> Vec<LoomCommand> {
        self.commands.lock().clone()
    }

    /// Picks received so far, in order
    pub fn sent_picks(&self) -> Vec<Pick> {
        self.commands
            .lock()
            .iter()
            .filter_map(|cmd| match cmd {
                LoomCommand::SendPick(pick) => Some(pick.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, cmd: LoomCommand) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            bail!("{} not connected", self.name);
        }
        debug!(driver = %self.name, command = ?cmd, "Simulated loom command");
        self.commands.lock().push(cmd);
        Ok(())
    }

    fn respond_after(&self, delay_ms: u64, event: LoomEvent) {
        if !self.config.auto_respond {
            return;
        }
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = tx.send(event).await;
        });
    }
}

#[async_trait]
impl LoomDriver for SimulatedLoom {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.pick_number.store(0, Ordering::SeqCst);
        let _ = self.event_tx.send(LoomEvent::Connection(true)).await;
        info!("✅ {} connected (auto_respond: {})", self.name, self.config.auto_respond);
        Ok(())
    }

    async fn vacuum_on(&self) -> Result<()> {
        self.record(LoomCommand::VacuumOn)?;
        self.respond_after(self.config.vacuum_delay_ms, LoomEvent::Vacuum(true));
        Ok(())
    }

    async fn vacuum_off(&self) -> Result<()> {
        self.record(LoomCommand::VacuumOff)?;
        self.respond_after(self.config.vacuum_delay_ms, LoomEvent::Vacuum(false));
        Ok(())
    }

    async fn send_pick(&self, pick: &Pick) -> Result<()> {
        self.record(LoomCommand::SendPick(pick.clone()))?;
        let number = self.pick_number.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "🧵 [{}] {} pick #{} → {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            self.name,
            number,
            pick
        );
        self.respond_after(self.config.pick_delay_ms, LoomEvent::PickRequest(true));
        Ok(())
    }

    fn pick_number(&self) -> u64 {
        self.pick_number.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<()> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            let _ = self.event_tx.try_send(LoomEvent::Connection(false));
            info!(
                "🛑 {} disconnected after {} picks",
                self.name,
                self.pick_number()
            );
        }
        Ok(())
    }
}

/// Pedal controller + relay stand-in
pub struct SimulatedPedals {
    name: String,
    config: SimulationConfig,
    event_tx: mpsc::Sender<PedalEvent>,
    toggles: AtomicU64,
}

impl SimulatedPedals {
    pub fn new(config: SimulationConfig, event_tx: mpsc::Sender<PedalEvent>) -> Self {
        Self {
            name: "sim-pedals".to_string(),
            config,
            event_tx,
            toggles: AtomicU64::new(0),
        }
    }

    /// Relay toggles issued so far
    pub fn toggles(&self) -> u64 {
        self.toggles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PedalDriver for SimulatedPedals {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<()> {
        let _ = self.event_tx.send(PedalEvent::RelayReady).await;
        let _ = self
            .event_tx
            .send(PedalEvent::Count {
                num_pedals: self.config.pedals,
                pedal_states: vec![false; self.config.pedals],
            })
            .await;
        info!("✅ {} initialized with {} pedals", self.name, self.config.pedals);
        Ok(())
    }

    async fn toggle_relay(&self) -> Result<()> {
        let count = self.toggles.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "🔀 [{}] {} relay toggled [toggle #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            self.name,
            count
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        info!("{} shutdown ({} relay toggles)", self.name, self.toggles());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loom_rejects_commands_before_init() {
        let (tx, _rx) = mpsc::channel(8);
        let loom = SimulatedLoom::new(SimulationConfig::silent(), tx);

        assert!(loom.vacuum_on().await.is_err());
        assert!(loom.commands().is_empty());
    }

    #[tokio::test]
    async fn test_loom_lifecycle() {
        let (tx, mut rx) = mpsc::channel(8);
        let loom = SimulatedLoom::new(SimulationConfig::silent(), tx);

        loom.init().await.unwrap();
        assert_eq!(rx.recv().await, Some(LoomEvent::Connection(true)));

        loom.vacuum_on().await.unwrap();
        loom.send_pick(&Pick::new(vec![true, false])).await.unwrap();
        assert_eq!(loom.pick_number(), 1);
        assert_eq!(
            loom.commands(),
            vec![
                LoomCommand::VacuumOn,
                LoomCommand::SendPick(Pick::new(vec![true, false]))
            ]
        );

        loom.shutdown().await.unwrap();
        assert_eq!(rx.recv().await, Some(LoomEvent::Connection(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loom_auto_responds() {
        let (tx, mut rx) = mpsc::channel(8);
        let loom = SimulatedLoom::new(SimulationConfig::default(), tx);
        loom.init().await.unwrap();
        assert_eq!(rx.recv().await, Some(LoomEvent::Connection(true)));

        loom.vacuum_on().await.unwrap();
        assert_eq!(rx.recv().await, Some(LoomEvent::Vacuum(true)));

        loom.send_pick(&Pick::new(vec![true])).await.unwrap();
        assert_eq!(rx.recv().await, Some(LoomEvent::PickRequest(true)));
    }

    #[tokio::test]
    async fn test_pedals_init_reports_relay_and_count() {
        let (tx, mut rx) = mpsc::channel(8);
        let pedals = SimulatedPedals::new(SimulationConfig::default(), tx);

        pedals.init().await.unwrap();
        assert_eq!(rx.recv().await, Some(PedalEvent::RelayReady));
        assert_eq!(
            rx.recv().await,
            Some(PedalEvent::Count {
                num_pedals: 4,
                pedal_states: vec![false; 4]
            })
        );

        pedals.toggle_relay().await.unwrap();
        assert_eq!(pedals.toggles(), 1);
    }
}
