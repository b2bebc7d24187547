//! # natter runtime
//!
//! Turns the framework into a running bot:
//!
//! - [`config`]: layered configuration via figment
//! - [`logging`]: `tracing-subscriber` setup driven by that configuration
//! - [`Bot`]: one wired bot instance and its outbound path
//! - [`DispatchLoop`]: the `Idle → Running → Draining → Stopped` event loop
//! - [`NatterRuntime`]: builder and launcher
//! - [`testing`]: an in-memory transport and an end-to-end harness
//!
//! ```rust,ignore
//! use natter_runtime::NatterRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = NatterRuntime::builder().plugin(my_plugin()).build()?;
//!     runtime.run(Arc::new(MyTransport::new())).await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod testing;

pub use bot::{Bot, Outbound};
pub use config::{ConfigError, ConfigLoader, ConfigResult, NatterConfig};
pub use dispatch::{DispatchLoop, LoopState};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{NatterRuntime, RunningBot, RuntimeBuilder};

// Re-export tracing for use by plugin crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
