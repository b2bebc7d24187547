//! The per-invocation context handed to every handler.
//!
//! A [`Context`] bundles three things:
//!
//! - the [`Payload`] that caused the invocation,
//! - a [`BotHandle`] to the running bot (sending, rooms, registry, flows),
//! - the [`PluginScope`] of the plugin that owns the handler, if any.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::command::{Args, CommandParser, Invocation};
use crate::flow::FlowEngine;
use crate::registry::CallbackRegistry;
use natter_core::{
    BoxedMessenger, Identifier, Message, Presence, RoomEvent, RoomRegistry, TransportResult,
};

// =============================================================================
// Payload
// =============================================================================

/// The event data a handler is invoked with.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A message routed to generic message handlers.
    Message(Message),
    /// A message routed to one command handler.
    Command {
        message: Message,
        invocation: Invocation,
    },
    /// A message that mentioned known participants.
    Mention {
        message: Message,
        mentioned: Vec<Identifier>,
    },
    Presence(Presence),
    Room(RoomEvent),
    /// The transport connected and the bot is up.
    Connect,
}

// =============================================================================
// BotHandle
// =============================================================================

/// Shared access to the running bot.
#[derive(Clone)]
pub struct BotHandle {
    messenger: BoxedMessenger,
    rooms: Arc<RoomRegistry>,
    registry: Arc<CallbackRegistry>,
    flows: FlowEngine,
    parser: Arc<CommandParser>,
    admins: Arc<[String]>,
}

impl BotHandle {
    pub fn new(
        messenger: BoxedMessenger,
        rooms: Arc<RoomRegistry>,
        registry: Arc<CallbackRegistry>,
        flows: FlowEngine,
        parser: Arc<CommandParser>,
        admins: Vec<String>,
    ) -> Self {
        Self {
            messenger,
            rooms,
            registry,
            flows,
            parser,
            admins: admins.into(),
        }
    }

    pub fn messenger(&self) -> &BoxedMessenger {
        &self.messenger
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn flows(&self) -> &FlowEngine {
        &self.flows
    }

    pub fn parser(&self) -> &CommandParser {
        &self.parser
    }

    pub fn identifier(&self) -> Identifier {
        self.messenger.bot_identifier()
    }

    /// Whether `who` is one of the configured bot admins.
    pub fn is_admin(&self, who: &Identifier) -> bool {
        self.admins.iter().any(|a| a == who.person())
    }
}

// =============================================================================
// PluginScope
// =============================================================================

/// Identity and configuration of the plugin owning a handler.
#[derive(Debug, Clone)]
pub struct PluginScope {
    name: Arc<str>,
    config: Arc<Value>,
}

impl PluginScope {
    pub fn new(name: impl Into<Arc<str>>, config: Value) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_config(&self) -> &Value {
        &self.config
    }

    /// Deserializes the plugin's configuration section.
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(self.config.as_ref())
    }
}

// =============================================================================
// Context
// =============================================================================

pub struct Context {
    payload: Payload,
    bot: BotHandle,
    plugin: Option<PluginScope>,
}

impl Context {
    pub fn new(payload: Payload, bot: BotHandle, plugin: Option<PluginScope>) -> Self {
        Self {
            payload,
            bot,
            plugin,
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn bot(&self) -> &BotHandle {
        &self.bot
    }

    pub fn plugin(&self) -> Option<&PluginScope> {
        self.plugin.as_ref()
    }

    /// The message behind a message, command or mention payload.
    pub fn message(&self) -> Option<&Message> {
        match &self.payload {
            Payload::Message(message)
            | Payload::Command { message, .. }
            | Payload::Mention { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn invocation(&self) -> Option<&Invocation> {
        match &self.payload {
            Payload::Command { invocation, .. } => Some(invocation),
            _ => None,
        }
    }

    /// Command arguments; empty for non-command payloads.
    pub fn args(&self) -> Args {
        self.invocation()
            .map(|inv| inv.args.clone())
            .unwrap_or_default()
    }

    pub fn mentioned(&self) -> &[Identifier] {
        match &self.payload {
            Payload::Mention { mentioned, .. } => mentioned,
            _ => &[],
        }
    }

    pub fn presence(&self) -> Option<&Presence> {
        match &self.payload {
            Payload::Presence(presence) => Some(presence),
            _ => None,
        }
    }

    pub fn room_event(&self) -> Option<&RoomEvent> {
        match &self.payload {
            Payload::Room(event) => Some(event),
            _ => None,
        }
    }

    /// Who caused this invocation, when there is such a person.
    pub fn sender(&self) -> Option<&Identifier> {
        match &self.payload {
            Payload::Presence(presence) => Some(&presence.identifier),
            Payload::Room(RoomEvent::Joined { occupant, .. } | RoomEvent::Left { occupant, .. }) => {
                Some(occupant)
            }
            _ => self.message().map(|m| &m.frm),
        }
    }

    /// The owning plugin's configuration, deserialized. Plugins without a
    /// config section see `{}`.
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.plugin {
            Some(scope) => scope.config(),
            None => T::deserialize(Value::Object(Default::default())),
        }
    }

    /// Replies to the originating message; a no-op for payloads without one.
    pub async fn reply(&self, body: impl Into<String>) -> TransportResult<()> {
        match self.message() {
            Some(message) => self.bot.messenger.reply(message, body.into()).await,
            None => Ok(()),
        }
    }
}
