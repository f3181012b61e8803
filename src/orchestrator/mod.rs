//! Weave orchestrator - turns hardware and remote events into loom actions
//!
//! The orchestrator is the only place that commands the hardware:
//! - Loom connection/vacuum reports are mirrored to the store
//! - `active-draft` starts and stops a weaving session
//! - The two-stage vacuum handshake and the shed settle delay
//! - Pick transmission, at most one row in flight
//! - Physical and virtual pedal presses toggle the relay
//!
//! All handling happens on one task; see [`WeaveOrchestrator::run`].

mod session;

pub use session::{SessionState, WeaveSession, SETTLE_DELAY};


use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::hardware::{LoomDriver, LoomEvent, PedalDriver, PedalEvent};
use crate::mirror::{MirrorEvent, StateMirror};
use crate::pick::{self, Pick};

/// Drives the loom from hardware events and mirrored remote state
pub struct WeaveOrchestrator {
    mirror: StateMirror,
    loom: Arc<dyn LoomDriver>,
    pedals: Arc<dyn PedalDriver>,
    session: WeaveSession,
    /// Relay reported ready; virtual pedals are ignored until then
    relay_ready: bool,
    /// Tabby requests from bench pedals
    tabby_requests: u64,
}

impl WeaveOrchestrator {
    pub fn new(
        mirror: StateMirror,
        loom: Arc<dyn LoomDriver>,
        pedals: Arc<dyn PedalDriver>,
    ) -> Self {
        Self {
            mirror,
            loom,
            pedals,
            session: WeaveSession::new(),
            relay_ready: false,
            tabby_requests: 0,
        }
    }

    pub fn session(&self) -> &WeaveSession {
        &self.session
    }

    pub fn mirror(&self) -> &StateMirror {
        &self.mirror
    }

    pub fn relay_ready(&self) -> bool {
        self.relay_ready
    }

    pub fn tabby_requests(&self) -> u64 {
        self.tabby_requests
    }

    /// When the relay is due to open the shed, if a session is settling
    pub fn settle_deadline(&self) -> Option<Instant> {
        self.session.settle_deadline()
    }

    /// Re-assert the controller heartbeat
    pub fn keep_alive(&mut self) {
        self.mirror.keep_alive();
    }

    // =========================================================================
    // Loom events
    // =========================================================================

    pub async fn handle_loom_event(&mut self, event: LoomEvent) {
        match event {
            LoomEvent::Connection(online) => {
                info!(loom = %self.loom.name(), online, "🔌 Loom connection changed");
                self.mirror.set_loom_online(online);
            }
            LoomEvent::Vacuum(on) => {
                debug!(on, state = %self.session.state(), "Vacuum status from loom");
                self.mirror.set_vacuum_on(on);
                if on {
                    self.on_vacuum_confirmed().await;
                }
            }
            LoomEvent::PickRequest(ready) => self.on_pick_request(ready).await,
        }
    }

    async fn on_vacuum_confirmed(&mut self) {
        match self.session.state() {
            SessionState::AwaitingFirstVacuumConfirm => {
                self.session.first_confirmed();
                info!("💨 First vacuum confirmation, sending first pick");
                log_failure(self.loom.name(), "vacuum-on", self.loom.vacuum_on().await);
                self.transmit_held().await;
            }
            SessionState::AwaitingSecondVacuumConfirm => {
                // Only rows newer than the one already sent
                if let Some(raw) = self.mirror.take_unread_pick_data() {
                    self.hold_raw(&raw);
                }
                self.session.second_confirmed(Instant::now());
                info!(
                    delay_ms = SETTLE_DELAY.as_millis() as u64,
                    "💨 Second vacuum confirmation, shed settling"
                );
            }
            state => debug!(%state, "Vacuum confirmation outside handshake ignored"),
        }
    }

    async fn on_pick_request(&mut self, ready: bool) {
        if !self.session.state().accepts_pick_requests() {
            debug!(ready, state = %self.session.state(), "Pick request ignored");
            return;
        }

        self.session.set_ready(ready);
        self.mirror.set_loom_ready(ready);
        if !ready {
            return;
        }

        if self.session.held().is_some() {
            self.transmit_held().await;
        } else {
            info!(reason = %SyncError::NoPickAvailable, "⏳ Loom ready, waiting for pick data");
        }
    }

    /// Relay toggle once the shed settle delay has passed
    pub async fn on_settle_elapsed(&mut self) {
        if !self.session.settle_elapsed() {
            return;
        }
        info!("🧶 Shed open, weaving");
        log_failure(self.pedals.name(), "toggle-relay", self.pedals.toggle_relay().await);
    }

    /// Send the held pick, if any
    ///
    /// Readiness is consumed only once the loom accepts the pick. A failed
    /// transmission puts the pick back unless a newer row replaced it
    /// meanwhile, and the loom stays ready for the next row.
    pub async fn transmit_held(&mut self) {
        let Some(pick) = self.session.take_held() else {
            info!(reason = %SyncError::NoPickAvailable, "Nothing to transmit");
            return;
        };

        match self.loom.send_pick(&pick).await {
            Ok(()) => {
                self.session.mark_transmitted();
                self.mirror.set_loom_ready(false);
                info!(
                    pick = %pick,
                    raised = pick.raised(),
                    pick_number = self.loom.pick_number(),
                    "📤 Pick sent"
                );
            }
            Err(e) => {
                warn!(loom = %self.loom.name(), error = %e, "Pick transmission failed, keeping row");
                self.session.restore(pick);
            }
        }
    }

    // =========================================================================
    // Pedal events
    // =========================================================================

    pub async fn handle_pedal_event(&mut self, event: PedalEvent) {
        match event {
            PedalEvent::RelayReady => {
                info!(pedals = %self.pedals.name(), "✅ Relay ready");
                self.relay_ready = true;
            }
            PedalEvent::Count {
                num_pedals,
                pedal_states,
            } => {
                self.mirror
                    .pedal_array_mut()
                    .update_array(num_pedals, &pedal_states)
                    .await;
            }
            PedalEvent::States { id, state } => {
                log_failure(self.pedals.name(), "toggle-relay", self.pedals.toggle_relay().await);
                if let Err(e) = self.mirror.pedal_array().set_node(id, state) {
                    error!(id, state, error = %e, "Pedal state not mirrored");
                }
            }
            PedalEvent::Vacuum => {
                self.tabby_requests += 1;
                info!(count = self.tabby_requests, "Tabby requested from bench pedals");
            }
        }
    }

    // =========================================================================
    // Mirror events
    // =========================================================================

    pub async fn handle_mirror_event(&mut self, event: MirrorEvent) {
        match event {
            MirrorEvent::ActiveDraft(true) => self.start_session().await,
            MirrorEvent::ActiveDraft(false) => self.stop_session().await,
            MirrorEvent::PickData(_) => self.on_pick_data().await,
            MirrorEvent::NumPicks(count) => debug!(count, "Draft pick count"),
            MirrorEvent::VirtualPedalCount(count) => debug!(count, "Virtual pedal count"),
            MirrorEvent::VirtualPedalStates(states) => {
                if self.relay_ready {
                    debug!(%states, "Virtual pedal changed");
                    log_failure(self.pedals.name(), "toggle-relay", self.pedals.toggle_relay().await);
                } else {
                    debug!(%states, "Virtual pedal change before relay ready, ignored");
                }
            }
            MirrorEvent::RemoteUnavailable(e) => warn!(error = %e, "Remote store unavailable"),
        }
    }

    async fn start_session(&mut self) {
        if !self.session.start() {
            debug!(state = %self.session.state(), "Draft already active");
            return;
        }
        info!(run = self.session.runs(), "▶️ Active draft, starting vacuum handshake");
        self.hold_buffered_pick();
        log_failure(self.loom.name(), "vacuum-on", self.loom.vacuum_on().await);
    }

    async fn stop_session(&mut self) {
        let previous = self.session.stop();
        if previous.is_active() {
            info!(%previous, "⏹️ Draft deactivated, session closed");
        }
        log_failure(self.loom.name(), "vacuum-off", self.loom.vacuum_off().await);
    }

    async fn on_pick_data(&mut self) {
        if !self.session.is_active() {
            debug!("Pick data buffered while idle");
            return;
        }
        // Several notifications can share one buffered value
        let Some(raw) = self.mirror.take_unread_pick_data() else {
            debug!("Pick data already taken");
            return;
        };
        match pick::decode(&raw) {
            Some(row) => {
                debug!(pick = %row, "Pick data updated");
                self.session.hold(row);
                if self.session.is_ready() {
                    self.transmit_held().await;
                }
            }
            None => debug!(%raw, "Empty pick data, keeping held row"),
        }
    }

    /// Decode whatever the buffer holds into the held pick
    fn hold_buffered_pick(&mut self) {
        let raw = self.mirror.read_pick_data();
        self.hold_raw(&raw);
    }

    fn hold_raw(&mut self, raw: &serde_json::Value) {
        if let Some(row) = pick::decode(raw) {
            debug!(pick = %row, "Holding buffered pick");
            self.session.hold(row);
        }
    }

    pub fn held_pick(&self) -> Option<&Pick> {
        self.session.held()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Run until `shutdown` resolves, then shut down cleanly
    pub async fn run<S>(
        mut self,
        mut loom_rx: mpsc::Receiver<LoomEvent>,
        mut pedal_rx: mpsc::Receiver<PedalEvent>,
        mut mirror_rx: mpsc::UnboundedReceiver<MirrorEvent>,
        keep_alive_every: Duration,
        shutdown: S,
    ) -> Self
    where
        S: Future<Output = ()>,
    {
        let mut heartbeat = tokio::time::interval(keep_alive_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("🚀 Weave orchestrator running");

        loop {
            let deadline = self.session.settle_deadline();

            tokio::select! {
                Some(event) = loom_rx.recv() => self.handle_loom_event(event).await,
                Some(event) = pedal_rx.recv() => self.handle_pedal_event(event).await,
                Some(event) = mirror_rx.recv() => self.handle_mirror_event(event).await,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_settle_elapsed().await;
                }
                _ = heartbeat.tick() => self.keep_alive(),
                _ = &mut shutdown => break,
            }
        }

        self.shutdown().await;
        self
    }

    /// Stop the loom, sign off and drain pending writes
    pub async fn shutdown(&mut self) {
        info!("Shutting down weave orchestrator...");
        self.session.stop();
        log_failure(self.loom.name(), "vacuum-off", self.loom.vacuum_off().await);
        log_failure(self.loom.name(), "shutdown", self.loom.shutdown().await);
        log_failure(self.pedals.name(), "shutdown", self.pedals.shutdown().await);

        self.mirror.set_loom_online(false);
        self.mirror.set_loom_ready(false);
        self.mirror.sign_off();
        self.mirror.flush().await;
        self.mirror.shutdown();
        info!("✅ Weave orchestrator stopped");
    }
}

fn log_failure(driver: &str, command: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(driver, command, error = %e, "Hardware command failed");
    }
}
