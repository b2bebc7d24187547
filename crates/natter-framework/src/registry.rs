//! The callback registry.
//!
//! Maps each [`CallbackKind`] to an ordered list of handler registrations
//! and keeps the table of known commands.
//!
//! Lookups work on snapshots: the whole table sits behind an `Arc` that
//! writers replace wholesale (copy-on-write), so a dispatch already holding a
//! snapshot is never affected by a concurrent register or unregister.
//!
//! Ordering within one kind: all [`Priority::System`] registrations first,
//! then [`Priority::Normal`], each group in registration order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::context::PluginScope;
use crate::handler::BoxedHandler;

/// Event kinds handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Message,
    Mention,
    Presence,
    RoomJoined,
    RoomLeft,
    RoomTopic,
    Connect,
}

/// Invocation priority. System handlers run ahead of plugin handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    System,
    #[default]
    Normal,
}

/// Handle returned by every registration, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One event callback.
pub struct Registration {
    pub id: HandlerId,
    pub kind: CallbackKind,
    pub priority: Priority,
    /// Label used in logs.
    pub name: String,
    pub scope: Option<PluginScope>,
    pub handler: BoxedHandler,
}

impl Registration {
    pub fn owner(&self) -> Option<&str> {
        self.scope.as_ref().map(PluginScope::name)
    }
}

/// One command.
pub struct CommandEntry {
    pub id: HandlerId,
    pub spec: CommandSpec,
    pub priority: Priority,
    pub scope: Option<PluginScope>,
    pub handler: BoxedHandler,
}

impl CommandEntry {
    pub fn owner(&self) -> Option<&str> {
        self.scope.as_ref().map(PluginScope::name)
    }
}

#[derive(Default, Clone)]
struct Table {
    callbacks: HashMap<CallbackKind, Vec<Arc<Registration>>>,
    commands: Vec<Arc<CommandEntry>>,
}

#[derive(Default)]
pub struct CallbackRegistry {
    table: RwLock<Arc<Table>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn update<R>(&self, f: impl FnOnce(&mut Table) -> R) -> R {
        let mut guard = self.table.write();
        let mut table = Table::clone(&guard);
        let result = f(&mut table);
        *guard = Arc::new(table);
        result
    }

    // ─── Callbacks ───────────────────────────────────────────────────────────

    /// Registers `handler` for `kind`.
    pub fn register(
        &self,
        kind: CallbackKind,
        priority: Priority,
        name: impl Into<String>,
        scope: Option<PluginScope>,
        handler: BoxedHandler,
    ) -> HandlerId {
        let id = self.next_id();
        let registration = Arc::new(Registration {
            id,
            kind,
            priority,
            name: name.into(),
            scope,
            handler,
        });
        debug!(handler = %registration.name, ?kind, ?priority, "Callback registered");
        self.update(|table| {
            let list = table.callbacks.entry(kind).or_default();
            let at = list.partition_point(|r| r.priority <= priority);
            list.insert(at, registration);
        });
        id
    }

    /// Snapshot of the handlers for `kind`, in invocation order.
    pub fn lookup(&self, kind: CallbackKind) -> Vec<Arc<Registration>> {
        let table = Arc::clone(&self.table.read());
        table.callbacks.get(&kind).cloned().unwrap_or_default()
    }

    // ─── Commands ────────────────────────────────────────────────────────────

    pub fn register_command(
        &self,
        spec: CommandSpec,
        priority: Priority,
        scope: Option<PluginScope>,
        handler: BoxedHandler,
    ) -> HandlerId {
        let id = self.next_id();
        self.update(|table| {
            if table.commands.iter().any(|c| c.spec.name() == spec.name()) {
                warn!(
                    command = %spec.name(),
                    "Command registered twice, the earlier registration keeps precedence"
                );
            }
            debug!(command = %spec.name(), "Command registered");
            table.commands.push(Arc::new(CommandEntry {
                id,
                spec,
                priority,
                scope,
                handler,
            }));
        });
        id
    }

    /// Finds the command `text` invokes, returning it with the argument text.
    ///
    /// When several commands match, the first one registered wins and the
    /// ambiguity is logged.
    pub fn match_command<'a>(&self, text: &'a str) -> Option<(Arc<CommandEntry>, &'a str)> {
        let table = Arc::clone(&self.table.read());
        let mut candidates = table
            .commands
            .iter()
            .filter_map(|entry| entry.spec.match_text(text).map(|args| (entry, args)));
        let (entry, args) = candidates.next()?;
        let others: Vec<&str> = candidates.map(|(e, _)| e.spec.name()).collect();
        if !others.is_empty() {
            warn!(
                chosen = %entry.spec.name(),
                also_matched = ?others,
                "Ambiguous command, first registered wins"
            );
        }
        Some((Arc::clone(entry), args))
    }

    /// Snapshot of all commands, in registration order.
    pub fn commands(&self) -> Vec<Arc<CommandEntry>> {
        self.table.read().commands.clone()
    }

    // ─── Removal ─────────────────────────────────────────────────────────────

    /// Removes the callback or command with this id.
    pub fn unregister(&self, id: HandlerId) -> bool {
        self.update(|table| {
            let before = table.len();
            for list in table.callbacks.values_mut() {
                list.retain(|r| r.id != id);
            }
            table.commands.retain(|c| c.id != id);
            table.len() != before
        })
    }

    /// Removes every callback and command owned by `plugin`.
    pub fn unregister_owner(&self, plugin: &str) -> usize {
        let removed = self.update(|table| {
            let before = table.len();
            for list in table.callbacks.values_mut() {
                list.retain(|r| r.owner() != Some(plugin));
            }
            table.commands.retain(|c| c.owner() != Some(plugin));
            before - table.len()
        });
        debug!(plugin = %plugin, removed, "Unregistered plugin handlers");
        removed
    }
}

impl Table {
    fn len(&self) -> usize {
        self.callbacks.values().map(Vec::len).sum::<usize>() + self.commands.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler;
    use serde_json::Value;

    fn noop() -> BoxedHandler {
        handler(|_ctx| async { Ok(()) })
    }

    fn scope(name: &str) -> Option<PluginScope> {
        Some(PluginScope::new(name, Value::Null))
    }

    fn names(list: &[Arc<Registration>]) -> Vec<&str> {
        list.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_system_handlers_run_first() {
        let registry = CallbackRegistry::new();
        registry.register(CallbackKind::Message, Priority::Normal, "a", None, noop());
        registry.register(CallbackKind::Message, Priority::System, "sys1", None, noop());
        registry.register(CallbackKind::Message, Priority::Normal, "b", None, noop());
        registry.register(CallbackKind::Message, Priority::System, "sys2", None, noop());
        registry.register(CallbackKind::Presence, Priority::Normal, "p", None, noop());

        let list = registry.lookup(CallbackKind::Message);
        assert_eq!(names(&list), vec!["sys1", "sys2", "a", "b"]);
        assert!(registry.lookup(CallbackKind::Mention).is_empty());
    }

    #[test]
    fn test_lookup_is_a_snapshot() {
        let registry = CallbackRegistry::new();
        let id = registry.register(CallbackKind::Message, Priority::Normal, "a", None, noop());
        let snapshot = registry.lookup(CallbackKind::Message);

        registry.register(CallbackKind::Message, Priority::Normal, "b", None, noop());
        assert!(registry.unregister(id));

        assert_eq!(names(&snapshot), vec!["a"]);
        assert_eq!(names(&registry.lookup(CallbackKind::Message)), vec!["b"]);
        assert!(!registry.unregister(id));
    }

    #[test]
    fn test_unregister_owner() {
        let registry = CallbackRegistry::new();
        registry.register(CallbackKind::Message, Priority::Normal, "a", scope("p1"), noop());
        registry.register(CallbackKind::Presence, Priority::Normal, "b", scope("p1"), noop());
        registry.register(CallbackKind::Message, Priority::Normal, "c", scope("p2"), noop());
        registry.register_command("cmd".into(), Priority::Normal, scope("p1"), noop());

        assert_eq!(registry.unregister_owner("p1"), 3);
        assert_eq!(names(&registry.lookup(CallbackKind::Message)), vec!["c"]);
        assert!(registry.commands().is_empty());
    }

    #[test]
    fn test_match_command_first_registered_wins() {
        let registry = CallbackRegistry::new();
        registry.register_command("flows start".into(), Priority::Normal, scope("a"), noop());
        registry.register_command("flows".into(), Priority::Normal, scope("b"), noop());

        let (entry, args) = registry.match_command("Flows start poll").unwrap();
        assert_eq!(entry.spec.name(), "flows start");
        assert_eq!(entry.owner(), Some("a"));
        assert_eq!(args, "poll");

        let (entry, args) = registry.match_command("flows list").unwrap();
        assert_eq!(entry.spec.name(), "flows");
        assert_eq!(args, "list");

        assert!(registry.match_command("unknown").is_none());
    }
}
