//! # natter framework
//!
//! Everything between the event queue and the transport:
//!
//! - [`registry`]: which handlers and commands exist, as lock-free snapshots
//! - [`command`]: prefix stripping, multi-word command matching, arguments
//! - [`pool`]: the bounded [`WorkerPool`] handlers run on
//! - [`flow`]: multi-turn conversational state machines and their engine
//! - [`plugin`]: plugin descriptions and the [`PluginManager`] lifecycle
//! - [`dispatcher`]: routing one event to flows, commands and callbacks
//!
//! Handlers are tower services over an [`Arc<Context>`](Context), so any
//! tower layer can wrap them.

pub mod command;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod handler;
pub mod plugin;
pub mod pool;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use command::{Args, CommandParser, CommandSpec, Invocation};
pub use context::{BotHandle, Context, Payload, PluginScope};
pub use dispatcher::{DispatchOptions, Dispatcher};
pub use error::{BoxError, FlowError, FlowResult, PluginError, PluginResult, PoolError};
pub use flow::{
    FlowAction, FlowDefinition, FlowEngine, FlowOptions, FlowScope, FlowSummary, FlowVars,
    SessionInfo, Trigger, action,
};
pub use handler::{BoxedHandler, Reply, handler};
pub use plugin::{Plugin, PluginBuilder, PluginLoadState, PluginManager};
pub use pool::{TaskHandle, TaskOutcome, WorkerPool};
pub use registry::{CallbackKind, CallbackRegistry, HandlerId, Priority};

/// Commonly used framework items.
pub mod prelude {
    pub use crate::{
        Args, BoxError, BotHandle, CallbackKind, CommandSpec, Context, FlowDefinition,
        FlowScope, FlowVars, Payload, Plugin, PluginScope, Reply, Trigger, action, handler,
    };
}
