//! Runtime orchestration.
//!
//! [`NatterRuntime`] collects the configuration, plugins and renderer, and
//! turns a transport into a [`RunningBot`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use natter_runtime::NatterRuntime;
//!
//! let runtime = NatterRuntime::builder()
//!     .config_file("config/natter.toml")
//!     .plugin(weather_plugin())
//!     .build()?;
//!
//! // Runs until Ctrl+C, SIGTERM or a terminator event.
//! runtime.run(Arc::new(MyTransport::connect_later())).await?;
//! ```
//!
//! # Startup
//!
//! 1. plugins are registered and activated in dependency order
//! 2. `transport.connect(events)`, then `transport.on_connect()`
//! 3. the rooms in `bot.chatroom_presence` are joined
//! 4. the connect callbacks are submitted and the dispatch loop starts

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use natter_core::{BoxedRenderer, BoxedTransport, Event, EventSender, PlainText, Renderer, event_queue};
use natter_framework::{BotHandle, Plugin};

use crate::bot::Bot;
use crate::config::{ConfigLoader, ConfigResult, NatterConfig, validate_config};
use crate::dispatch::{DispatchLoop, LoopState};
use crate::error::RuntimeResult;
use crate::logging;

/// Everything needed to start a bot.
pub struct NatterRuntime {
    config: NatterConfig,
    plugins: Vec<Plugin>,
    renderer: BoxedRenderer,
}

impl NatterRuntime {
    /// Loads the configuration from the current directory, falling back to
    /// defaults, with the built-in plugins.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                NatterConfig::default()
            });

        let mut runtime = Self::from_config(&config);
        runtime.plugins = natter_framework::plugin::builtin::all();
        runtime
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime without plugins and initialises logging from
    /// `config`.
    pub fn from_config(config: &NatterConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            prefix = %config.bot.prefix,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            plugins: Vec::new(),
            renderer: Arc::new(PlainText),
        }
    }

    pub fn config(&self) -> &NatterConfig {
        &self.config
    }

    pub fn add_plugin(&mut self, plugin: Plugin) {
        self.plugins.push(plugin);
    }

    pub fn set_renderer(&mut self, renderer: impl Renderer + 'static) {
        self.renderer = Arc::new(renderer);
    }

    /// Wires a bot around `transport`, connects it and starts the dispatch
    /// loop. Returns once the loop has left [`LoopState::Idle`].
    ///
    /// If connecting fails the plugins are shut down again before the error
    /// is returned.
    pub async fn start(self, transport: BoxedTransport) -> RuntimeResult<RunningBot> {
        let (events, receiver) = event_queue(self.config.queue.bound());
        let bot = Arc::new(Bot::new(
            self.config,
            transport,
            self.renderer,
            events.clone(),
        ));

        if let Err(e) = bot.load_plugins(self.plugins).await {
            bot.plugins().shutdown().await;
            return Err(e.into());
        }

        let dispatch = DispatchLoop::new(Arc::clone(&bot), receiver);
        let state = dispatch.state();

        if let Err(e) = bot.connect().await {
            error!(error = %e, "Failed to connect transport");
            bot.plugins().shutdown().await;
            return Err(e.into());
        }

        // Connect handlers only need the worker pool, so they are submitted
        // before the loop exists; a failure leaves nothing running.
        if let Err(e) = bot.fire_connect().await {
            error!(error = %e, "Failed to fire connect callbacks");
            bot.shutdown().await;
            return Err(e.into());
        }

        let task = tokio::spawn(dispatch.run());
        let mut started = state.clone();
        let _ = started.wait_for(|s| *s != LoopState::Idle).await;

        info!(transport = bot.transport().name(), "Bot started");
        Ok(RunningBot {
            bot,
            events,
            state,
            task,
        })
    }

    /// Runs until Ctrl+C, SIGTERM, or until the dispatch loop stops on its
    /// own.
    pub async fn run(self, transport: BoxedTransport) -> RuntimeResult<()> {
        let running = self.start(transport).await?;
        let mut state = running.watch_state();

        info!("natter is now running. Press Ctrl+C to stop.");
        tokio::select! {
            _ = wait_for_shutdown() => {}
            _ = state.wait_for(|s| *s == LoopState::Stopped) => {
                info!("Dispatch loop stopped on its own");
            }
        }

        running.stop().await
    }
}

impl Default for NatterRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for shutdown signals (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c.await;
                info!("Received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received Ctrl+C, shutting down");
    }
}

// =============================================================================
// RunningBot
// =============================================================================

/// A started bot.
pub struct RunningBot {
    bot: Arc<Bot>,
    events: EventSender,
    state: watch::Receiver<LoopState>,
    task: JoinHandle<RuntimeResult<()>>,
}

impl RunningBot {
    pub fn bot(&self) -> &Arc<Bot> {
        &self.bot
    }

    pub fn handle(&self) -> &BotHandle {
        self.bot.handle()
    }

    /// The inbound queue, for injecting events.
    pub fn events(&self) -> &EventSender {
        &self.events
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Enqueues the terminator and waits for the loop to finish.
    ///
    /// Events queued before the terminator are still dispatched.
    pub async fn stop(self) -> RuntimeResult<()> {
        if self.events.enqueue(Event::stop()).await.is_err() {
            info!("Event queue already closed");
        }
        self.wait().await
    }

    /// Waits for the dispatch loop to stop and returns its outcome.
    pub async fn wait(self) -> RuntimeResult<()> {
        self.task.await?
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`NatterRuntime`].
///
/// Built-in plugins are included unless
/// [`without_builtin_plugins`](Self::without_builtin_plugins) is called.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<NatterConfig>,
    plugins: Vec<Plugin>,
    renderer: Option<BoxedRenderer>,
    builtin_plugins: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
            plugins: Vec::new(),
            renderer: None,
            builtin_plugins: true,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Uses `config` as is; no files or environment are read.
    pub fn config(mut self, config: NatterConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Plugin>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    /// Renders outbound bodies; defaults to [`PlainText`].
    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn without_builtin_plugins(mut self) -> Self {
        self.builtin_plugins = false;
        self
    }

    pub fn build(self) -> ConfigResult<NatterRuntime> {
        let config = match self.config {
            Some(config) => {
                validate_config(&config)?;
                config
            }
            None => self.config_loader.load()?,
        };

        let mut runtime = NatterRuntime::from_config(&config);
        if self.builtin_plugins {
            runtime.plugins = natter_framework::plugin::builtin::all();
        }
        runtime.plugins.extend(self.plugins);
        if let Some(renderer) = self.renderer {
            runtime.renderer = renderer;
        }
        Ok(runtime)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
