//! The bot instance: everything one transport connection needs.
//!
//! A [`Bot`] owns the canonical room set, the callback registry, both pools,
//! the plugin manager and the outbound path. Handlers only ever see the
//! [`BotHandle`] it hands out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use natter_core::{
    BoxedRenderer, BoxedTransport, Event, EventSender, Identifier, Message, Messenger,
    RoomRegistry, StreamRequest, TransportError, TransportResult,
};
use natter_framework::{
    BotHandle, CallbackRegistry, CommandParser, Dispatcher, FlowEngine, Plugin, PluginManager,
    PluginResult, PoolError, WorkerPool,
};

use crate::config::NatterConfig;

// =============================================================================
// Outbound
// =============================================================================

/// The [`Messenger`] handed to handlers: renders each body once and hands
/// the message to the transport.
///
/// The first [`TransportError::Closed`] from the transport puts a terminator
/// on the notify lane, so the dispatch loop drains and stops.
pub struct Outbound {
    transport: BoxedTransport,
    renderer: BoxedRenderer,
    nick_prefixed: bool,
    events: EventSender,
    hung_up: AtomicBool,
}

impl Outbound {
    pub fn new(
        transport: BoxedTransport,
        renderer: BoxedRenderer,
        nick_prefixed: bool,
        events: EventSender,
    ) -> Self {
        Self {
            transport,
            renderer,
            nick_prefixed,
            events,
            hung_up: AtomicBool::new(false),
        }
    }

    fn watch_closed<T>(&self, result: TransportResult<T>) -> TransportResult<T> {
        if let Err(TransportError::Closed) = &result
            && !self.hung_up.swap(true, Ordering::SeqCst)
        {
            error!(transport = self.transport.name(), "Transport closed, stopping");
            if self.events.notify(Event::stop()).is_err() {
                debug!("Event queue already closed");
            }
        }
        result
    }
}

#[async_trait]
impl Messenger for Outbound {
    fn bot_identifier(&self) -> Identifier {
        self.transport.bot_identifier()
    }

    async fn send_message(&self, mut message: Message) -> TransportResult<()> {
        message.body = self.renderer.render(&message.body)?;
        debug!(
            transport = self.transport.name(),
            to = ?message.to,
            "Sending message"
        );
        let sent = self.transport.send_message(message).await;
        self.watch_closed(sent)
    }

    async fn send_stream(&self, request: StreamRequest) -> TransportResult<()> {
        debug!(to = %request.to, name = %request.name, size = request.size(), "Offering stream");
        let offered = self.transport.send_stream_request(request).await;
        self.watch_closed(offered)
    }

    fn resolve_identifier(&self, name: &str) -> Option<Identifier> {
        self.transport.resolve_identifier(name)
    }

    async fn reply(&self, origin: &Message, body: String) -> TransportResult<()> {
        let body = if self.nick_prefixed && origin.is_group() {
            format!("@{} {body}", origin.frm.nick())
        } else {
            body
        };
        self.send_message(origin.reply(self.bot_identifier(), body))
            .await
    }
}

// =============================================================================
// Bot
// =============================================================================

/// One running bot, wired from a [`NatterConfig`].
pub struct Bot {
    config: NatterConfig,
    transport: BoxedTransport,
    events: EventSender,
    dispatcher: Dispatcher,
    plugins: PluginManager,
}

impl Bot {
    /// Wires a bot. `events` is the producer side of the queue the dispatch
    /// loop drains; room changes are reported on it.
    pub fn new(
        config: NatterConfig,
        transport: BoxedTransport,
        renderer: BoxedRenderer,
        events: EventSender,
    ) -> Self {
        let outbound: Arc<Outbound> = Arc::new(Outbound::new(
            Arc::clone(&transport),
            renderer,
            config.bot.groupchat_nick_prefixed,
            events.clone(),
        ));

        let parser = Arc::new(
            CommandParser::new(config.bot.prefix.clone())
                .with_alt_prefixes(config.bot.alt_prefixes.iter().cloned())
                .prefix_optional_on_chat(config.bot.prefix_optional_on_chat),
        );
        let flows = FlowEngine::new(outbound.clone(), Arc::clone(&parser), config.flow_options());
        let handle = BotHandle::new(
            outbound,
            Arc::new(RoomRegistry::with_events(events.clone())),
            Arc::new(CallbackRegistry::new()),
            flows,
            parser,
            config.bot.admins.clone(),
        );

        let workers = WorkerPool::new("workers", config.workers.size, config.workers.backlog);
        let dispatcher = Dispatcher::new(handle.clone(), workers, config.dispatch_options());
        let plugins = PluginManager::new(handle, config.plugins.clone());

        Self {
            config,
            transport,
            events,
            dispatcher,
            plugins,
        }
    }

    pub fn config(&self) -> &NatterConfig {
        &self.config
    }

    pub fn handle(&self) -> &BotHandle {
        self.dispatcher.bot()
    }

    pub fn transport(&self) -> &BoxedTransport {
        &self.transport
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// Registers plugins and activates all of them in dependency order.
    pub async fn load_plugins(&self, plugins: Vec<Plugin>) -> PluginResult<usize> {
        for plugin in plugins {
            self.plugins.register_plugin(plugin).await?;
        }
        let active = self.plugins.activate_all().await;
        info!(
            active,
            registered = self.plugins.plugin_count().await,
            "Plugins activated"
        );
        Ok(active)
    }

    /// Connects the transport, joins the configured rooms and fires the
    /// connect callbacks.
    pub async fn connect(&self) -> TransportResult<()> {
        self.transport.connect(self.events.clone()).await?;
        info!(transport = self.transport.name(), "Transport connected");
        self.transport.on_connect().await;

        let me = self.transport.bot_identifier();
        for room in &self.config.bot.chatroom_presence {
            if !self.handle().rooms().join(room, &me) {
                warn!(room = %room, "Could not join configured room");
            }
        }
        Ok(())
    }

    pub async fn fire_connect(&self) -> Result<(), PoolError> {
        self.dispatcher.fire_connect().await
    }

    /// Drains both pools, then tells the transport and the plugins.
    pub async fn shutdown(&self) {
        let workers = self.dispatcher.workers();
        workers.close();
        workers.join().await;
        debug!("Worker pool drained");

        let flows = self.handle().flows();
        flows.close();
        flows.join().await;
        debug!("Flow pool drained");

        self.transport.on_disconnect().await;
        self.plugins.shutdown().await;
        info!("Bot shut down");
    }
}
