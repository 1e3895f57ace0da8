use std::io;
use thiserror::Error;

use crate::pdi::PdiState;

/// Errors raised by the bridge library.
///
/// An unrecognized classification code is not an error; see
/// [`crate::pdi::Gesture::Unknown`].
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Register bus unavailable at {path}: {reason}")]
    BusUnavailable { path: String, reason: String },

    #[error("Invalid channel buffer size: expected {expected} bytes, got {actual}")]
    InvalidBufferSize { expected: usize, actual: usize },

    #[error("Accelerator did not leave {phase:?} after {polls} polls")]
    ProtocolTimeout { phase: PdiState, polls: u64 },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Whether the orchestrator may retry the PDI phase after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::ProtocolTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
