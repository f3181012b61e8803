//! Hardware drivers (loom, pedals/relay)
//!
//! Drivers push their events into tokio channels handed to them at
//! construction and expose a small async command surface. The orchestrator
//! only ever sees these traits, so the simulated drivers and real ones are
//! interchangeable.

use anyhow::Result;
use async_trait::async_trait;

use crate::pick::Pick;

pub mod simulated;

pub use simulated::{LoomCommand, SimulatedLoom, SimulatedPedals, SimulationConfig};

/// Event reported by the loom
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoomEvent {
    /// Loom connected (true) or dropped (false)
    Connection(bool),
    /// Vacuum pump status / confirmation
    Vacuum(bool),
    /// Loom asks for the next pick (true) or withdraws readiness (false)
    PickRequest(bool),
}

/// Event reported by the pedal controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PedalEvent {
    /// The relay driving the loom is ready to be toggled
    RelayReady,
    /// Number of connected pedals changed
    Count {
        num_pedals: usize,
        pedal_states: Vec<bool>,
    },
    /// A single pedal changed state
    States { id: usize, state: bool },
    /// Vacuum signal from bench pedals (simulation only)
    Vacuum,
}

/// Loom driver - all methods take &self, use interior mutability for state
#[async_trait]
pub trait LoomDriver: Send + Sync {
    /// Driver name for logging
    fn name(&self) -> &str;

    /// Connect to the loom
    async fn init(&self) -> Result<()>;

    /// Ask the loom to start the vacuum pump
    async fn vacuum_on(&self) -> Result<()>;

    /// Ask the loom to stop the vacuum pump
    async fn vacuum_off(&self) -> Result<()>;

    /// Transmit one row to the loom
    async fn send_pick(&self, pick: &Pick) -> Result<()>;

    /// Picks sent since connection (diagnostics only)
    fn pick_number(&self) -> u64;

    /// Disconnect gracefully
    async fn shutdown(&self) -> Result<()>;
}

/// Pedal/relay driver
#[async_trait]
pub trait PedalDriver: Send + Sync {
    /// Driver name for logging
    fn name(&self) -> &str;

    /// Open the pedal inputs and the relay
    async fn init(&self) -> Result<()>;

    /// Flip the relay that drives the loom's shed
    async fn toggle_relay(&self) -> Result<()>;

    /// Release the hardware
    async fn shutdown(&self) -> Result<()>;
}
