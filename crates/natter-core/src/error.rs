//! Error types shared by the core primitives.
//!
//! Plugin-level failures live in `natter-framework`; this module only covers
//! what the transport boundary, the event queue and the renderer can report.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur at the transport boundary.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport has been shut down; nothing more can be sent or received.
    #[error("transport closed")]
    Closed,

    /// Connecting to the chat network failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Sending an outbound message failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Rendering the outbound body failed before it reached the wire.
    #[error("render failed: {0}")]
    RenderFailed(#[from] RenderError),

    /// The transport does not implement the requested operation.
    #[error("operation '{0}' is not supported by this transport")]
    Unsupported(&'static str),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Queue Errors
// =============================================================================

/// Errors reported by the inbound event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue was shut down or every sender is gone.
    #[error("event queue closed")]
    Closed,

    /// A non-blocking enqueue found the queue at capacity.
    #[error("event queue full")]
    Full,
}

impl From<QueueError> for TransportError {
    fn from(_: QueueError) -> Self {
        TransportError::Closed
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

// =============================================================================
// Render Errors
// =============================================================================

/// A markup body could not be converted to the target dialect.
#[derive(Debug, Clone, Error)]
#[error("cannot render markup: {reason}")]
pub struct RenderError {
    /// Why rendering failed.
    pub reason: String,
}

impl RenderError {
    /// Creates a render error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Room Errors
// =============================================================================

/// Errors raised by the canonical room registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// The room is not part of the canonical room set.
    #[error("room '{0}' does not exist")]
    NotFound(String),
}
