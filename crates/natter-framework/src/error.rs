//! Error types for the natter framework.
//!
//! Handler failures are plain [`BoxError`]s: plugin code returns whatever
//! error it likes and the worker pool logs it together with the handler and
//! event it came from.

use thiserror::Error;

pub use tower::BoxError;

// =============================================================================
// Pool Errors
// =============================================================================

/// Errors reported by a [`WorkerPool`](crate::pool::WorkerPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool no longer accepts submissions.
    #[error("worker pool closed")]
    Closed,
}

// =============================================================================
// Flow Errors
// =============================================================================

/// Errors raised by flow definitions and the flow engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Too many consecutive automatic transitions in one trigger.
    #[error("flow '{flow}' exceeded {limit} consecutive automatic transitions at state '{state}'")]
    AutoChainExceeded {
        flow: String,
        state: String,
        limit: usize,
    },

    /// A transition points at a state the flow does not declare.
    #[error("flow '{flow}' has no state named '{state}'")]
    UndefinedState { flow: String, state: String },

    /// The definition is structurally invalid.
    #[error("flow '{flow}' is invalid: {reason}")]
    InvalidDefinition { flow: String, reason: String },

    /// A flow with this name is already registered.
    #[error("flow '{0}' is already registered")]
    DuplicateFlow(String),

    /// No flow with this name is registered.
    #[error("no flow named '{0}'")]
    UnknownFlow(String),

    /// The requested flow already has a live session for this identifier.
    #[error("flow '{flow}' is already running for {owner}")]
    AlreadyRunning { flow: String, owner: String },

    /// A state action returned an error or panicked.
    #[error("flow '{flow}' failed in state '{state}': {reason}")]
    ActionFailed {
        flow: String,
        state: String,
        reason: String,
    },

    /// The flow pool refused the work.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl FlowError {
    pub(crate) fn invalid(flow: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            flow: flow.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Result type for flow operations.
pub type FlowResult<T> = Result<T, FlowError>;

// =============================================================================
// Plugin Errors
// =============================================================================

/// Errors raised by the [`PluginManager`](crate::plugin::PluginManager).
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("plugin '{0}' is already registered")]
    Duplicate(String),

    #[error("plugin '{0}' is not registered")]
    NotFound(String),

    #[error("plugin '{0}' is not active")]
    NotActive(String),

    /// A declared dependency is missing or not active.
    #[error("plugin '{plugin}' depends on '{dependency}', which is not active")]
    MissingDependency { plugin: String, dependency: String },

    /// The activation hook failed; the plugin's registrations were rolled back.
    #[error("plugin '{plugin}' failed to activate: {reason}")]
    ActivationFailed { plugin: String, reason: String },

    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
