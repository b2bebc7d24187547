//! Runtime error types.

use natter_core::{QueueError, TransportError};
use natter_framework::{PluginError, PoolError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can stop a bot from starting or running.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting or talking to the chat network failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Event queue error: {0}")]
    Queue(#[from] QueueError),

    /// A pool refused work the dispatch loop had to submit.
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// Registering a plugin failed.
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Bot has already been started")]
    AlreadyStarted,

    /// The dispatch loop task panicked or was cancelled.
    #[error("Dispatch loop task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
