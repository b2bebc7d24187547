//! Plugin lifecycle management.
//!
//! [`PluginManager`] owns every registered [`Plugin`] and drives it through
//! its lifecycle:
//!
//! - [`register_plugin`](PluginManager::register_plugin) stores the plugin as
//!   [`PluginLoadState::Registered`]; nothing is live yet.
//! - [`activate_all`](PluginManager::activate_all) activates registered
//!   plugins in dependency order, one layer at a time. Plugins of the same
//!   layer do not depend on each other and activate concurrently.
//! - Activation enters the plugin's commands, callbacks and flows into the
//!   bot, owned by the plugin name, then runs `on_activate`. A missing
//!   dependency or a failing hook leaves the plugin
//!   [`PluginLoadState::Failed`] with nothing registered.
//! - [`deactivate`](PluginManager::deactivate) removes everything the plugin
//!   owns (dependents first) and [`shutdown`](PluginManager::shutdown) does
//!   the same for all plugins in reverse dependency order.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = PluginManager::new(bot_handle, plugin_configs);
//! manager.register_plugin(weather_plugin()).await?;
//! manager.activate_all().await;
//! // ...later...
//! manager.shutdown().await;
//! ```

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future;
use serde_json::{Map, Value};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{error, info, warn};

use super::{LifecycleHook, Plugin};
use crate::context::{BotHandle, PluginScope};
use crate::error::{PluginError, PluginResult};
use crate::pool::panic_message;

// =============================================================================
// Topological sort utility
// =============================================================================

/// Computes the activation order as **layers** via Kahn's algorithm.
///
/// Each inner `Vec<usize>` holds indices of plugins that may activate in
/// parallel. An edge **A → B** means "B depends on A". Deactivation order is
/// the reversed slice of layers.
///
/// Dependencies on unregistered plugins are logged and ignored here; the
/// dependency check at activation time fails those plugins.
///
/// # Errors
///
/// Returns `Err(description)` when a dependency cycle is detected.
fn topological_layers(plugins: &[Arc<Plugin>]) -> Result<Vec<Vec<usize>>, String> {
    let n = plugins.len();
    let index: HashMap<&str, usize> = plugins
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name(), i))
        .collect();

    let mut in_degree: Vec<usize> = vec![0; n];
    let mut dependents: Vec<Vec<usize>> = vec![vec![]; n];

    for (i, plugin) in plugins.iter().enumerate() {
        for dependency in plugin.depends_on() {
            match index.get(dependency.as_str()) {
                Some(&provider) if provider != i => {
                    dependents[provider].push(i);
                    in_degree[i] += 1;
                }
                Some(_) => {
                    warn!(plugin = %plugin.name(), "Plugin depends on itself, ignored");
                }
                None => {
                    warn!(
                        plugin = %plugin.name(),
                        dependency = %dependency,
                        "Unresolved dependency, no registered plugin has that name"
                    );
                }
            }
        }
    }

    let mut layers: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0;

    while !current.is_empty() {
        processed += current.len();
        let mut next: Vec<usize> = Vec::new();
        for &i in &current {
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    next.push(j);
                }
            }
        }
        layers.push(current);
        current = next;
    }

    if processed != n {
        let cycle: Vec<&str> = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| plugins[i].name())
            .collect();
        return Err(format!(
            "Plugin dependency cycle detected among: {}",
            cycle.join(", ")
        ));
    }

    Ok(layers)
}

/// Lifecycle state of a plugin registered with [`PluginManager`].
///
/// ```text
/// register_plugin() ──► Registered
///     activate*()   ──► Active     (dependencies active, on_activate succeeded)
///                   ──► Failed     (dependency missing or on_activate failed)
///     deactivate()  ──► Registered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLoadState {
    Registered,
    Active,
    Failed,
}

// =============================================================================
// PluginManager
// =============================================================================

struct PluginEntry {
    plugin: Arc<Plugin>,
    state: PluginLoadState,
}

/// Central owner of plugin registration and lifecycle.
pub struct PluginManager {
    bot: BotHandle,
    plugins: AsyncRwLock<Vec<PluginEntry>>,
    /// Per-plugin config sections, keyed by plugin name.
    plugin_configs: HashMap<String, Value>,
}

impl PluginManager {
    pub fn new(bot: BotHandle, plugin_configs: HashMap<String, Value>) -> Self {
        Self {
            bot,
            plugins: AsyncRwLock::new(Vec::new()),
            plugin_configs,
        }
    }

    // ─── Registration & queries ──────────────────────────────────────────────

    /// Registers a plugin. It stays inactive until activated.
    pub async fn register_plugin(&self, plugin: Plugin) -> PluginResult<()> {
        let mut plugins = self.plugins.write().await;
        if plugins.iter().any(|e| e.plugin.name() == plugin.name()) {
            return Err(PluginError::Duplicate(plugin.name().to_owned()));
        }
        info!(plugin = %plugin.name(), "Plugin registered");
        plugins.push(PluginEntry {
            plugin: Arc::new(plugin),
            state: PluginLoadState::Registered,
        });
        Ok(())
    }

    pub async fn plugin_count(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// Names of all registered plugins, in registration order.
    pub async fn plugin_names(&self) -> Vec<String> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|e| e.plugin.name().to_owned())
            .collect()
    }

    pub async fn plugin_state(&self, name: &str) -> Option<PluginLoadState> {
        self.plugins
            .read()
            .await
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| e.state)
    }

    pub async fn get_plugin_by_name(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins
            .read()
            .await
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| Arc::clone(&e.plugin))
    }

    fn scope_for(&self, name: &str) -> PluginScope {
        let config = self
            .plugin_configs
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::default()));
        PluginScope::new(name, config)
    }

    async fn set_state(&self, name: &str, state: PluginLoadState) {
        let mut plugins = self.plugins.write().await;
        if let Some(entry) = plugins.iter_mut().find(|e| e.plugin.name() == name) {
            entry.state = state;
        }
    }

    /// Plugins and their dependency layers; a cycle degrades to registration
    /// order, one plugin per layer.
    async fn layers(&self) -> (Vec<Arc<Plugin>>, Vec<Vec<usize>>) {
        let plugins: Vec<Arc<Plugin>> = self
            .plugins
            .read()
            .await
            .iter()
            .map(|e| Arc::clone(&e.plugin))
            .collect();
        let layers = match topological_layers(&plugins) {
            Ok(layers) => layers,
            Err(e) => {
                error!("{e}");
                (0..plugins.len()).map(|i| vec![i]).collect()
            }
        };
        (plugins, layers)
    }

    /// The first dependency of `plugin` that is not active.
    async fn missing_dependency(&self, plugin: &Plugin) -> Option<String> {
        let plugins = self.plugins.read().await;
        plugin
            .depends_on()
            .iter()
            .find(|dep| {
                !plugins
                    .iter()
                    .any(|e| e.plugin.name() == dep.as_str() && e.state == PluginLoadState::Active)
            })
            .cloned()
    }

    // ─── Activation ──────────────────────────────────────────────────────────

    /// Activates every registered plugin in dependency order. Returns how many
    /// plugins became active.
    pub async fn activate_all(&self) -> usize {
        let (plugins, layers) = self.layers().await;
        let mut activated = 0;

        for layer in layers {
            // ── 1. Select registered plugins whose dependencies are active ──
            let mut ready: Vec<Arc<Plugin>> = Vec::new();
            for &i in &layer {
                let plugin = &plugins[i];
                if self.plugin_state(plugin.name()).await != Some(PluginLoadState::Registered) {
                    continue;
                }
                if let Some(dependency) = self.missing_dependency(plugin).await {
                    error!(
                        plugin = %plugin.name(),
                        missing_dependency = %dependency,
                        "Plugin dependency not satisfied, plugin will not be activated"
                    );
                    self.set_state(plugin.name(), PluginLoadState::Failed).await;
                    continue;
                }
                ready.push(Arc::clone(plugin));
            }

            // ── 2. Activate the layer concurrently ───────────────────────────
            let results = future::join_all(ready.iter().map(|p| self.activate_one(p))).await;

            // ── 3. Record the outcome ────────────────────────────────────────
            for (plugin, result) in ready.iter().zip(results) {
                let state = match result {
                    Ok(()) => {
                        activated += 1;
                        PluginLoadState::Active
                    }
                    Err(e) => {
                        error!(plugin = %plugin.name(), error = %e, "Plugin activation failed");
                        PluginLoadState::Failed
                    }
                };
                self.set_state(plugin.name(), state).await;
            }
        }
        activated
    }

    /// Activates one registered (or previously failed) plugin. Activating an
    /// active plugin does nothing.
    pub async fn activate(&self, name: &str) -> PluginResult<()> {
        let plugin = self
            .get_plugin_by_name(name)
            .await
            .ok_or_else(|| PluginError::NotFound(name.to_owned()))?;
        if self.plugin_state(name).await == Some(PluginLoadState::Active) {
            return Ok(());
        }
        if let Some(dependency) = self.missing_dependency(&plugin).await {
            self.set_state(name, PluginLoadState::Failed).await;
            return Err(PluginError::MissingDependency {
                plugin: name.to_owned(),
                dependency,
            });
        }
        match self.activate_one(&plugin).await {
            Ok(()) => {
                self.set_state(name, PluginLoadState::Active).await;
                Ok(())
            }
            Err(e) => {
                self.set_state(name, PluginLoadState::Failed).await;
                Err(e)
            }
        }
    }

    async fn activate_one(&self, plugin: &Arc<Plugin>) -> PluginResult<()> {
        let name = plugin.name();
        let scope = self.scope_for(name);
        let registry = self.bot.registry();

        for (spec, handler) in plugin.command_handlers() {
            registry.register_command(
                spec.clone(),
                plugin.priority(),
                Some(scope.clone()),
                handler.clone(),
            );
        }
        for (kind, handler) in plugin.callbacks() {
            registry.register(
                *kind,
                plugin.priority(),
                format!("{name}:{kind:?}"),
                Some(scope.clone()),
                handler.clone(),
            );
        }

        let result = async {
            for flow in plugin.flows() {
                self.bot.flows().register(flow.clone(), Some(name))?;
            }
            if let Some(hook) = plugin.activate_hook() {
                self.run_hook(hook, &scope)
                    .await
                    .map_err(|reason| PluginError::ActivationFailed {
                        plugin: name.to_owned(),
                        reason,
                    })?;
            }
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => info!(plugin = %name, "Plugin activated"),
            Err(_) => self.unregister_all(name),
        }
        result
    }

    // ─── Deactivation ────────────────────────────────────────────────────────

    /// Deactivates an active plugin, deactivating the active plugins that
    /// depend on it first.
    pub async fn deactivate(&self, name: &str) -> PluginResult<()> {
        match self.plugin_state(name).await {
            None => return Err(PluginError::NotFound(name.to_owned())),
            Some(PluginLoadState::Active) => {}
            Some(_) => return Err(PluginError::NotActive(name.to_owned())),
        }

        let (plugins, mut layers) = self.layers().await;
        let mut affected: HashSet<&str> = HashSet::from([name]);
        for layer in &layers {
            for &i in layer {
                let plugin = &plugins[i];
                if plugin.depends_on().iter().any(|d| affected.contains(d.as_str())) {
                    affected.insert(plugin.name());
                }
            }
        }

        layers.reverse();
        for i in layers.into_iter().flatten() {
            let plugin = &plugins[i];
            if !affected.contains(plugin.name()) {
                continue;
            }
            if self.plugin_state(plugin.name()).await != Some(PluginLoadState::Active) {
                continue;
            }
            if plugin.name() != name {
                warn!(plugin = %plugin.name(), dependency = %name, "Deactivating dependent plugin");
            }
            self.deactivate_one(plugin).await;
            self.set_state(plugin.name(), PluginLoadState::Registered).await;
        }
        Ok(())
    }

    /// Deactivates every active plugin in reverse dependency order.
    pub async fn shutdown(&self) {
        let (plugins, mut layers) = self.layers().await;
        layers.reverse();

        for layer in layers {
            let mut active: Vec<&Arc<Plugin>> = Vec::new();
            for &i in &layer {
                if self.plugin_state(plugins[i].name()).await == Some(PluginLoadState::Active) {
                    active.push(&plugins[i]);
                }
            }
            if active.is_empty() {
                continue;
            }
            future::join_all(active.iter().map(|p| self.deactivate_one(p))).await;
            for plugin in active {
                self.set_state(plugin.name(), PluginLoadState::Registered).await;
            }
        }
        info!("All plugins deactivated");
    }

    async fn deactivate_one(&self, plugin: &Arc<Plugin>) {
        let name = plugin.name();
        self.unregister_all(name);
        if let Some(hook) = plugin.deactivate_hook()
            && let Err(reason) = self.run_hook(hook, &self.scope_for(name)).await
        {
            error!(plugin = %name, error = %reason, "Plugin deactivation hook failed");
        }
        info!(plugin = %name, "Plugin deactivated");
    }

    fn unregister_all(&self, name: &str) {
        self.bot.registry().unregister_owner(name);
        self.bot.flows().unregister_owner(name);
    }

    async fn run_hook(&self, hook: &LifecycleHook, scope: &PluginScope) -> Result<(), String> {
        match AssertUnwindSafe(hook(scope.clone(), self.bot.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("panicked: {}", panic_message(&panic))),
        }
    }
}
