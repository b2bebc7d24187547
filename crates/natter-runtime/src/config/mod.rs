//! Configuration for a natter bot.
//!
//! [`NatterConfig`] is assembled by [`ConfigLoader`] from defaults, files and
//! `NATTER_*` environment variables, then checked by [`validate_config`].
//!
//! ```toml
//! [bot]
//! admins = ["alice"]
//! prefix = "!"
//! chatroom_presence = ["lobby"]
//!
//! [flows]
//! exclusive = false
//! session_timeout_secs = 600
//!
//! [logging]
//! level = "debug"
//! ```

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, FlowsConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    NatterConfig, PoolConfig, QueueConfig, SpanEventConfig,
};
pub use validation::validate_config;
