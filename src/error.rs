//! Error types for Quadra
//!
//! Error taxonomy covering framing, message validation, coordination,
//! and degenerate-state conditions.

use thiserror::Error;

/// Primary error type for all Quadra operations
#[derive(Debug, Error)]
pub enum QuadraError {
    // ========== Wire Protocol Errors ==========

    /// Stream framing could not be decoded
    #[error("Framing error: {reason}")]
    FramingError { reason: String },

    /// Payload exceeds the representable frame length
    #[error("Frame too large: {length} bytes exceeds maximum {max}")]
    FrameTooLarge { length: usize, max: usize },

    /// Message text did not match the expected shape
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    // ========== Coordination Errors ==========

    /// Worker not present in the membership table
    #[error("Worker {worker_id} not registered")]
    WorkerNotRegistered { worker_id: u64 },

    /// Request not present in the request table
    #[error("Request {request_id} not found")]
    RequestNotFound { request_id: u64 },

    /// Connection to a peer failed
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Service configuration is unusable
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // ========== Request Errors ==========

    /// Client supplied a malformed or inverted interval
    #[error("Invalid interval [{lower}, {upper})")]
    InvalidInterval { lower: i64, upper: i64 },

    /// No workers were available for the whole stall window
    #[error("Request {request_id} stalled: no workers available")]
    NoWorkersAvailable { request_id: u64 },

    // ========== I/O ==========

    /// Underlying socket operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuadraError {
    /// Returns true if the error is a clean disconnect rather than corruption
    pub fn is_disconnect(&self) -> bool {
        match self {
            QuadraError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Returns true if the error should only skip the current operation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QuadraError::InvalidMessage { .. } | QuadraError::InvalidInterval { .. }
        )
    }
}

/// Result type alias for Quadra operations
pub type Result<T> = std::result::Result<T, QuadraError>;
