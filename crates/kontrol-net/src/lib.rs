//! Kontrol Net - Broadcast/receive synchronization layer
//!
//! This crate keeps the Kontrol model synchronized across peers:
//! - `Liveness` - per-peer last-ping bookkeeping
//! - `OscBroadcaster` - bounded outbound queue, sender task, and the
//!   ping-driven master republish
//! - `OscReceiver` - listening socket, decode, and model dispatch

pub mod broadcaster;
pub mod liveness;
pub mod receiver;

pub use broadcaster::*;
pub use liveness::*;
pub use receiver::*;
