//! Error types for Kontrol

use thiserror::Error;

use crate::EntityId;

/// Errors surfaced by the model facade and the wire codec.
///
/// Fire-and-forget paths (event broadcast, datagram dispatch) log and
/// drop these instead of propagating them to callers.
#[derive(Error, Debug)]
pub enum KontrolError {
    // Wire errors
    #[error("invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("argument mismatch for {address}: {detail}")]
    ArgumentMismatch { address: String, detail: String },

    // Model errors
    #[error("rack not found: {0}")]
    RackNotFound(EntityId),

    #[error("module not found: {0}")]
    ModuleNotFound(EntityId),

    #[error("parameter not found: {0}")]
    ParamNotFound(EntityId),

    // Transport errors
    #[error("transport error: {0}")]
    TransportError(String),
}

/// Result type for Kontrol operations.
pub type KontrolResult<T> = Result<T, KontrolError>;
