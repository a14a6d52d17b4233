//! Kontrol OSC - Wire format for the sync protocol
//!
//! Each datagram carries one OSC bundle wrapping a single addressed
//! message with typed arguments:
//! - `#bundle` tag + immediate time tag + size-prefixed element
//! - Padded address string, `,`-prefixed type tag string
//! - Arguments: big-endian int32 / float32, padded null-terminated strings

pub mod arg;
pub mod message;
pub mod packet;

pub use arg::*;
pub use message::*;
pub use packet::*;
