//! Plugins: named bundles of commands, callbacks and flows.
//!
//! A [`Plugin`] is pure description. Nothing it carries is live until the
//! [`PluginManager`] activates it, at which point its commands and callbacks
//! are entered into the [`CallbackRegistry`](crate::registry::CallbackRegistry)
//! and its flows into the [`FlowEngine`](crate::flow::FlowEngine), all owned
//! by the plugin's name so deactivation can remove them again in one sweep.
//!
//! # Example
//!
//! ```rust,ignore
//! use natter::prelude::*;
//!
//! let weather = Plugin::builder("weather")
//!     .description("Tells you the weather")
//!     .command(
//!         CommandSpec::new("weather").help("weather <city>"),
//!         handler(|ctx: Arc<Context>| async move {
//!             let city = ctx.args().raw().to_owned();
//!             Ok(format!("It is sunny in {city}"))
//!         }),
//!     )
//!     .on_activate(|scope, _bot| async move {
//!         let cfg: WeatherConfig = scope.config()?;
//!         tracing::info!(api = %cfg.endpoint, "weather ready");
//!         Ok(())
//!     })
//!     .build();
//! ```
//!
//! # Configuration
//!
//! Each plugin sees its own section of the bot configuration:
//!
//! ```toml
//! [plugins.weather]
//! endpoint = "https://example.org/api"
//! ```

mod manager;

#[cfg(feature = "builtin-plugins")]
pub mod builtin;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

pub use manager::{PluginLoadState, PluginManager};

use crate::command::CommandSpec;
use crate::context::{BotHandle, PluginScope};
use crate::error::BoxError;
use crate::flow::FlowDefinition;
use crate::handler::BoxedHandler;
use crate::registry::{CallbackKind, Priority};

/// An activation or deactivation hook.
pub type LifecycleHook =
    Arc<dyn Fn(PluginScope, BotHandle) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

// =============================================================================
// Plugin
// =============================================================================

/// A plugin description, ready to be registered with a [`PluginManager`].
pub struct Plugin {
    name: String,
    description: String,
    priority: Priority,
    depends_on: Vec<String>,
    commands: Vec<(CommandSpec, BoxedHandler)>,
    callbacks: Vec<(CallbackKind, BoxedHandler)>,
    flows: Vec<FlowDefinition>,
    on_activate: Option<LifecycleHook>,
    on_deactivate: Option<LifecycleHook>,
}

impl Plugin {
    pub fn builder(name: impl Into<String>) -> PluginBuilder {
        PluginBuilder {
            plugin: Plugin {
                name: name.into(),
                description: String::new(),
                priority: Priority::Normal,
                depends_on: Vec::new(),
                commands: Vec::new(),
                callbacks: Vec::new(),
                flows: Vec::new(),
                on_activate: None,
                on_deactivate: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Names of the plugins that must be active before this one.
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter().map(|(spec, _)| spec)
    }

    pub fn flows(&self) -> &[FlowDefinition] {
        &self.flows
    }

    pub(crate) fn command_handlers(&self) -> &[(CommandSpec, BoxedHandler)] {
        &self.commands
    }

    pub(crate) fn callbacks(&self) -> &[(CallbackKind, BoxedHandler)] {
        &self.callbacks
    }

    pub(crate) fn activate_hook(&self) -> Option<&LifecycleHook> {
        self.on_activate.as_ref()
    }

    pub(crate) fn deactivate_hook(&self) -> Option<&LifecycleHook> {
        self.on_deactivate.as_ref()
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .field("commands", &self.commands().map(CommandSpec::name).collect::<Vec<_>>())
            .field("callbacks", &self.callbacks.len())
            .field("flows", &self.flows.iter().map(FlowDefinition::name).collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// PluginBuilder
// =============================================================================

pub struct PluginBuilder {
    plugin: Plugin,
}

impl PluginBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.plugin.description = description.into();
        self
    }

    /// Runs this plugin's handlers ahead of ordinary plugins.
    pub fn system(mut self) -> Self {
        self.plugin.priority = Priority::System;
        self
    }

    pub fn depends_on(mut self, plugin: impl Into<String>) -> Self {
        self.plugin.depends_on.push(plugin.into());
        self
    }

    pub fn command(mut self, spec: impl Into<CommandSpec>, handler: BoxedHandler) -> Self {
        self.plugin.commands.push((spec.into(), handler));
        self
    }

    pub fn on(mut self, kind: CallbackKind, handler: BoxedHandler) -> Self {
        self.plugin.callbacks.push((kind, handler));
        self
    }

    pub fn on_message(self, handler: BoxedHandler) -> Self {
        self.on(CallbackKind::Message, handler)
    }

    pub fn on_mention(self, handler: BoxedHandler) -> Self {
        self.on(CallbackKind::Mention, handler)
    }

    pub fn on_presence(self, handler: BoxedHandler) -> Self {
        self.on(CallbackKind::Presence, handler)
    }

    pub fn on_room_joined(self, handler: BoxedHandler) -> Self {
        self.on(CallbackKind::RoomJoined, handler)
    }

    pub fn on_room_left(self, handler: BoxedHandler) -> Self {
        self.on(CallbackKind::RoomLeft, handler)
    }

    pub fn on_room_topic(self, handler: BoxedHandler) -> Self {
        self.on(CallbackKind::RoomTopic, handler)
    }

    pub fn on_connect(self, handler: BoxedHandler) -> Self {
        self.on(CallbackKind::Connect, handler)
    }

    pub fn flow(mut self, definition: FlowDefinition) -> Self {
        self.plugin.flows.push(definition);
        self
    }

    /// Runs after the plugin's handlers are registered. An error rolls the
    /// activation back and marks the plugin failed.
    pub fn on_activate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(PluginScope, BotHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.on_activate = Some(Arc::new(move |scope, bot| hook(scope, bot).boxed()));
        self
    }

    /// Runs after the plugin's handlers were removed.
    pub fn on_deactivate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(PluginScope, BotHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.on_deactivate = Some(Arc::new(move |scope, bot| hook(scope, bot).boxed()));
        self
    }

    pub fn build(self) -> Plugin {
        self.plugin
    }
}
