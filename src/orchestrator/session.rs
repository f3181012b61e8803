//! WeaveSession - handshake state, held pick and loom readiness for one run

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::pick::Pick;

/// Delay between the second vacuum confirmation and the shed-opening relay toggle
pub const SETTLE_DELAY: Duration = Duration::from_millis(800);

/// Handshake phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingFirstVacuumConfirm,
    AwaitingSecondVacuumConfirm,
    /// Relay toggle due at `deadline`
    ShedSettling { deadline: Instant },
    Weaving,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }

    /// Loom pick requests are honoured from the second confirmation on
    pub fn accepts_pick_requests(&self) -> bool {
        matches!(
            self,
            SessionState::ShedSettling { .. } | SessionState::Weaving
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingFirstVacuumConfirm => "awaiting-first-vacuum",
            SessionState::AwaitingSecondVacuumConfirm => "awaiting-second-vacuum",
            SessionState::ShedSettling { .. } => "shed-settling",
            SessionState::Weaving => "weaving",
        };
        f.write_str(name)
    }
}

/// Everything scoped to one weaving run
///
/// Returning to `Idle` drops the held pick, the readiness flag and the
/// settle deadline in one step, so nothing from a previous run can fire
/// in the next one.
#[derive(Debug)]
pub struct WeaveSession {
    state: SessionState,
    held: Option<Pick>,
    ready: bool,
    runs: u64,
}

impl Default for WeaveSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WeaveSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            held: None,
            ready: false,
            runs: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn held(&self) -> Option<&Pick> {
        self.held.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Sessions started since creation
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Idle → AwaitingFirstVacuumConfirm; false if a run is already active
    pub fn start(&mut self) -> bool {
        if self.state.is_active() {
            return false;
        }
        self.state = SessionState::AwaitingFirstVacuumConfirm;
        self.held = None;
        self.ready = false;
        self.runs += 1;
        true
    }

    /// Any state → Idle, returning the state that was left
    pub fn stop(&mut self) -> SessionState {
        let previous = self.state;
        self.state = SessionState::Idle;
        self.held = None;
        self.ready = false;
        previous
    }

    /// Replace the held pick (last write wins)
    pub fn hold(&mut self, pick: Pick) {
        self.held = Some(pick);
    }

    /// Put back a pick whose transmission failed, unless a newer one arrived
    pub fn restore(&mut self, pick: Pick) {
        if self.held.is_none() {
            self.held = Some(pick);
        }
    }

    /// Take the held pick for transmission
    pub fn take_held(&mut self) -> Option<Pick> {
        self.held.take()
    }

    /// The loom accepted a pick; the next one waits for a new request
    pub fn mark_transmitted(&mut self) {
        self.ready = false;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// AwaitingFirstVacuumConfirm → AwaitingSecondVacuumConfirm
    pub fn first_confirmed(&mut self) -> bool {
        if self.state != SessionState::AwaitingFirstVacuumConfirm {
            return false;
        }
        self.state = SessionState::AwaitingSecondVacuumConfirm;
        true
    }

    /// AwaitingSecondVacuumConfirm → ShedSettling, relay due at `now + SETTLE_DELAY`
    pub fn second_confirmed(&mut self, now: Instant) -> bool {
        if self.state != SessionState::AwaitingSecondVacuumConfirm {
            return false;
        }
        self.state = SessionState::ShedSettling {
            deadline: now + SETTLE_DELAY,
        };
        true
    }

    pub fn settle_deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::ShedSettling { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// ShedSettling → Weaving
    pub fn settle_elapsed(&mut self) -> bool {
        if self.settle_deadline().is_none() {
            return false;
        }
        self.state = SessionState::Weaving;
        true
    }
}
