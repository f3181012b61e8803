//! loom-sync - loom and pedal state mirroring and weaving handshake
//!
//! Mirrors the controller's state into a shared key-value store, reacts to
//! the weaving software through the same store, and sequences the loom's
//! vacuum/shed/pick handshake.

pub mod config;
pub mod draft_player;
pub mod error;
pub mod hardware;
pub mod mirror;
pub mod orchestrator;
pub mod pick;
pub mod store;
pub mod sync;
