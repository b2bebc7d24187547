//! Configuration schema definitions.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable bot.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use natter_framework::{DispatchOptions, FlowOptions, WorkerPool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NatterConfig {
    /// Identity, prefixes and routing switches.
    #[serde(default)]
    pub bot: BotConfig,

    /// Inbound event queue.
    #[serde(default)]
    pub queue: QueueConfig,

    /// The pool ordinary handlers run on.
    #[serde(default)]
    pub workers: PoolConfig,

    /// The flow engine and its pool.
    #[serde(default)]
    pub flows: FlowsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-plugin configuration sections, keyed by plugin name.
    #[serde(default)]
    pub plugins: HashMap<String, Value>,
}

impl NatterConfig {
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            suppress_cmd_not_found: self.bot.suppress_cmd_not_found,
            exclusive_flows: self.flows.exclusive,
        }
    }

    pub fn flow_options(&self) -> FlowOptions {
        FlowOptions {
            workers: self.flows.size,
            backlog: self.flows.backlog,
            max_auto_advances: self.flows.max_auto_advances,
            session_timeout: self.flows.session_timeout_secs.map(Duration::from_secs),
        }
    }
}

// =============================================================================
// Bot
// =============================================================================

/// Bot-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Person handles allowed to run admin-only commands.
    #[serde(default)]
    pub admins: Vec<String>,

    /// Command prefix.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Alternative prefixes such as the bot's name, matched case-insensitively.
    #[serde(default)]
    pub alt_prefixes: Vec<String>,

    /// Direct messages may omit the prefix.
    #[serde(default = "default_true")]
    pub prefix_optional_on_chat: bool,

    /// Stay silent on unknown prefixed commands.
    #[serde(default)]
    pub suppress_cmd_not_found: bool,

    /// Prefix replies in rooms with `@nick` of the addressee.
    #[serde(default)]
    pub groupchat_nick_prefixed: bool,

    /// Rooms joined once connected.
    #[serde(default)]
    pub chatroom_presence: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            prefix: default_prefix(),
            alt_prefixes: Vec::new(),
            prefix_optional_on_chat: true,
            suppress_cmd_not_found: false,
            groupchat_nick_prefixed: false,
            chatroom_presence: Vec::new(),
        }
    }
}

fn default_prefix() -> String {
    "!".to_string()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Queue & pools
// =============================================================================

/// Inbound event queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued events; `0` means unbounded.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl QueueConfig {
    pub fn bound(&self) -> Option<usize> {
        (self.capacity > 0).then_some(self.capacity)
    }
}

fn default_queue_capacity() -> usize {
    1024
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Concurrent tasks.
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Submitted but unfinished tasks before submitters wait.
    #[serde(default = "default_backlog")]
    pub backlog: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            backlog: default_backlog(),
        }
    }
}

fn default_pool_size() -> usize {
    WorkerPool::default_workers()
}

fn default_backlog() -> usize {
    256
}

/// Flow engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    #[serde(default = "default_pool_size")]
    pub size: usize,

    #[serde(default = "default_backlog")]
    pub backlog: usize,

    /// Consecutive automatic transitions allowed per message.
    #[serde(default = "default_max_auto_advances")]
    pub max_auto_advances: usize,

    /// Idle sessions older than this are dropped.
    #[serde(default)]
    pub session_timeout_secs: Option<u64>,

    /// A message that advances a flow is not routed to commands or message
    /// handlers.
    #[serde(default)]
    pub exclusive: bool,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            backlog: default_backlog(),
            max_auto_advances: default_max_auto_advances(),
            session_timeout_secs: None,
            exclusive: false,
        }
    }
}

fn default_max_auto_advances() -> usize {
    32
}

// =============================================================================
// Logging
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Target file when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of the log statement.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module levels, e.g. `natter_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// How often the log file is rolled over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}
