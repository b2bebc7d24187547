//! # natter
//!
//! A plugin-driven chatbot engine: prefixed commands, event callbacks and
//! multi-turn conversational flows over any chat network a [`Transport`]
//! can speak.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐    ┌─────────────┐    ┌────────────┐    ┌──────────────┐
//! │ Transport │───▶│ event queue │───▶│ Dispatcher │───▶│ flow engine  │──▶ flow actions
//! │ (network) │    │  (bounded)  │    │            │───▶│ worker pool  │──▶ commands, callbacks
//! └───────────┘    └─────────────┘    └────────────┘    └──────────────┘
//!       ▲                                                       │
//!       └────────────────────── Messenger ◀─────────────────────┘
//! ```
//!
//! - **Transport**: connects to the network and feeds events into the queue
//! - **Dispatcher**: routes each event to flows, commands and callbacks
//! - **Plugins**: named bundles of commands, callbacks and flows
//! - **Flows**: per-person or per-room state machines driven by messages
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use natter::prelude::*;
//!
//! fn greeter() -> Plugin {
//!     Plugin::builder("greeter")
//!         .command(
//!             CommandSpec::new("hello").help("hello - says hello"),
//!             handler(|ctx: Arc<Context>| async move {
//!                 Ok::<_, BoxError>(format!("Hello, {}!", ctx.args().raw()))
//!             }),
//!         )
//!         .build()
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = NatterRuntime::builder().plugin(greeter()).build()?;
//!     runtime.run(Arc::new(MyTransport::new())).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `builtin-plugins`: `help`, `echo`/`whoami` and the `flows` commands (default)
//! - `toml-config`: read `natter.toml` (default)
//! - `yaml-config`: read `natter.yaml`
//! - `json-log`: JSON log output

pub use natter_core as core;
pub use natter_framework as framework;
pub use natter_runtime as runtime;

pub use natter_core::Transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use natter::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime - main entry point
    pub use natter_runtime::{NatterConfig, NatterRuntime, RunningBot};

    // Chat primitives and the transport seam
    pub use natter_core::prelude::*;

    // Plugins, handlers and flows
    pub use natter_framework::prelude::*;
    pub use natter_framework::{BoxedHandler, FlowAction, Priority};
}
