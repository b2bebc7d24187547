//! An in-memory transport and a harness for end-to-end plugin tests.
//!
//! ```rust,ignore
//! use natter_runtime::testing::TestBot;
//!
//! #[tokio::test]
//! async fn test_weather() {
//!     let bot = TestBot::builder().plugin(weather_plugin()).start().await;
//!     assert!(bot.exec_command("!weather Paris").await.contains("sunny"));
//!     bot.stop().await;
//! }
//! ```
//!
//! Messages are sent as the first configured admin unless
//! [`TestTransport::set_sender`] says otherwise.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use natter_core::{
    Address, Event, EventSender, Identifier, Message, Presence, Renderer, StreamRequest,
    Transport, TransportError, TransportResult,
};
use natter_framework::{BotHandle, Plugin};

use crate::config::NatterConfig;
use crate::dispatch::LoopState;
use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{NatterRuntime, RunningBot};

const READY: &str = "ready";

// =============================================================================
// TestTransport
// =============================================================================

/// A transport whose network is a pair of in-process queues.
pub struct TestTransport {
    me: Identifier,
    sender: Mutex<Identifier>,
    known: Mutex<Vec<Identifier>>,
    inbound: Mutex<Option<EventSender>>,
    outbound_tx: mpsc::UnboundedSender<Message>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    hung_up: AtomicBool,
}

impl TestTransport {
    /// A transport for bot `me`, talking as `sender`.
    pub fn new(me: Identifier, sender: Identifier) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            me,
            known: Mutex::new(vec![sender.clone()]),
            sender: Mutex::new(sender),
            inbound: Mutex::new(None),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            hung_up: AtomicBool::new(false),
        }
    }

    /// Every send from now on fails with [`TransportError::Closed`].
    pub fn hang_up(&self) {
        self.hung_up.store(true, Ordering::SeqCst);
    }

    /// Changes who subsequent pushes come from.
    pub fn set_sender(&self, who: Identifier) {
        self.know(who.clone());
        *self.sender.lock() = who;
    }

    pub fn sender(&self) -> Identifier {
        self.sender.lock().clone()
    }

    /// Makes `who` resolvable from `@name` mentions.
    pub fn know(&self, who: Identifier) {
        let mut known = self.known.lock();
        if !known.iter().any(|k| k.same_person(&who)) {
            known.push(who);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn events(&self) -> TransportResult<EventSender> {
        self.inbound.lock().clone().ok_or(TransportError::Closed)
    }

    /// Pushes any event into the bot's queue.
    pub async fn push_event(&self, event: impl Into<Event>) -> TransportResult<()> {
        let events = self.events()?;
        events.enqueue(event).await?;
        Ok(())
    }

    /// Pushes a direct message from the current sender.
    pub async fn push_message(&self, body: impl Into<String>) -> TransportResult<()> {
        let message = Message::direct(body, self.sender(), self.me.clone());
        self.push_event(message).await
    }

    /// Pushes a message posted by the current sender in `room`.
    pub async fn push_room_message(
        &self,
        room: &str,
        body: impl Into<String>,
    ) -> TransportResult<()> {
        let message = Message::in_room(body, self.sender(), room);
        self.push_event(message).await
    }

    pub async fn push_presence(&self, presence: Presence) -> TransportResult<()> {
        self.push_event(presence).await
    }

    /// Waits up to `timeout` for the next outbound message.
    pub async fn pop_message(&self, timeout: Duration) -> Option<Message> {
        let mut outbound = self.outbound_rx.lock().await;
        tokio::time::timeout(timeout, outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drops every outbound message not consumed yet.
    pub async fn zap_queues(&self) -> usize {
        let mut outbound = self.outbound_rx.lock().await;
        let mut zapped = 0;
        while let Ok(message) = outbound.try_recv() {
            warn!(body = %message.body, "Message left in the outgoing queue");
            zapped += 1;
        }
        zapped
    }
}

#[async_trait]
impl Transport for TestTransport {
    fn name(&self) -> &str {
        "test"
    }

    fn bot_identifier(&self) -> Identifier {
        self.me.clone()
    }

    async fn connect(&self, events: EventSender) -> TransportResult<()> {
        *self.inbound.lock() = Some(events);
        Ok(())
    }

    async fn send_message(&self, message: Message) -> TransportResult<()> {
        if self.hung_up.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        debug!(body = %message.body, "Outbound");
        self.outbound_tx
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    /// Streams are delivered as a message carrying the content.
    async fn send_stream_request(&self, request: StreamRequest) -> TransportResult<()> {
        let body = String::from_utf8_lossy(&request.content).into_owned();
        let message = Message::new(body, self.me.clone(), Address::Person(request.to))
            .with_extra("stream", serde_json::Value::String(request.name));
        self.send_message(message).await
    }

    fn resolve_identifier(&self, name: &str) -> Option<Identifier> {
        self.known
            .lock()
            .iter()
            .find(|id| id.person() == name || id.nick() == name)
            .cloned()
    }

    async fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// TestBot
// =============================================================================

/// A full bot over a [`TestTransport`].
pub struct TestBot {
    transport: Arc<TestTransport>,
    running: Option<RunningBot>,
    runtime: Option<NatterRuntime>,
}

impl TestBot {
    pub fn builder() -> TestBotBuilder {
        TestBotBuilder::default()
    }

    /// Starts the bot and waits until it answers `!echo ready`.
    ///
    /// Messages that arrive before the ready echo are discarded.
    pub async fn start(&mut self) -> RuntimeResult<()> {
        let runtime = self.runtime.take().ok_or(RuntimeError::AlreadyStarted)?;
        let prefix = runtime.config().bot.prefix.clone();
        let running = runtime.start(self.transport.clone()).await?;
        self.running = Some(running);

        self.transport
            .push_message(format!("{prefix}echo {READY}"))
            .await?;
        for _ in 0..60 {
            match self.transport.pop_message(Duration::from_secs(2)).await {
                Some(message) if message.body == READY => return Ok(()),
                Some(message) => warn!(body = %message.body, "Discarding message before ready"),
                None => break,
            }
        }
        Err(RuntimeError::Transport(TransportError::ConnectionFailed(
            "the ready echo was not received".to_string(),
        )))
    }

    pub fn transport(&self) -> &Arc<TestTransport> {
        &self.transport
    }

    /// The running bot's handle.
    ///
    /// # Panics
    ///
    /// If the bot is not running.
    pub fn handle(&self) -> &BotHandle {
        match &self.running {
            Some(running) => running.handle(),
            None => panic!("TestBot is not running"),
        }
    }

    pub fn state(&self) -> LoopState {
        self.running
            .as_ref()
            .map_or(LoopState::Idle, RunningBot::state)
    }

    pub async fn push_message(&self, body: impl Into<String>) -> TransportResult<()> {
        self.transport.push_message(body).await
    }

    pub async fn push_room_message(
        &self,
        room: &str,
        body: impl Into<String>,
    ) -> TransportResult<()> {
        self.transport.push_room_message(room, body).await
    }

    pub async fn push_presence(&self, presence: Presence) -> TransportResult<()> {
        self.transport.push_presence(presence).await
    }

    pub async fn pop_message(&self, timeout: Duration) -> Option<Message> {
        self.transport.pop_message(timeout).await
    }

    /// Sends `command` and returns the body of the first reply, or an empty
    /// string when none arrives within five seconds.
    pub async fn exec_command(&self, command: impl Into<String>) -> String {
        if let Err(e) = self.push_message(command).await {
            warn!(error = %e, "Could not push command");
            return String::new();
        }
        self.pop_message(Duration::from_secs(5))
            .await
            .map(|m| m.body)
            .unwrap_or_default()
    }

    /// Asserts that the first reply to `command` contains `response`.
    pub async fn assert_in_command(&self, command: &str, response: &str) {
        let reply = self.exec_command(command).await;
        assert!(reply.contains(response), "{response:?} not in {reply:?}");
    }

    /// Asserts that `command` names a known command.
    pub async fn assert_command_found(&self, command: &str) {
        let reply = self.exec_command(command).await;
        assert!(!reply.contains("not found"), "{command:?} was not found");
    }

    /// Stops the bot and waits for the dispatch loop to finish.
    pub async fn stop(mut self) -> RuntimeResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        let result = running.stop().await;
        self.transport.zap_queues().await;
        result
    }
}

/// Configures a [`TestBot`]. Admin `alice` and room `testroom` by default.
pub struct TestBotBuilder {
    config: NatterConfig,
    plugins: Vec<Plugin>,
    renderer: Option<Box<dyn FnOnce(&mut NatterRuntime) + Send>>,
}

impl Default for TestBotBuilder {
    fn default() -> Self {
        let mut config = NatterConfig::default();
        config.bot.admins = vec!["alice".to_string()];
        config.bot.chatroom_presence = vec!["testroom".to_string()];
        config.workers.size = 4;
        config.flows.size = 2;
        Self {
            config,
            plugins: Vec::new(),
            renderer: None,
        }
    }
}

impl TestBotBuilder {
    pub fn config(mut self, f: impl FnOnce(&mut NatterConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(move |runtime| runtime.set_renderer(renderer)));
        self
    }

    /// Builds the bot without starting it.
    pub fn build(self) -> TestBot {
        let sender = self
            .config
            .bot
            .admins
            .first()
            .map_or_else(|| Identifier::new("tester"), Identifier::new);
        let transport = Arc::new(TestTransport::new(Identifier::new("natter"), sender));

        let mut runtime = NatterRuntime::from_config(&self.config);
        for plugin in natter_framework::plugin::builtin::all()
            .into_iter()
            .chain(self.plugins)
        {
            runtime.add_plugin(plugin);
        }
        if let Some(apply) = self.renderer {
            apply(&mut runtime);
        }

        TestBot {
            transport,
            running: None,
            runtime: Some(runtime),
        }
    }

    /// Builds and starts the bot.
    ///
    /// # Panics
    ///
    /// If the bot does not come up.
    pub async fn start(self) -> TestBot {
        let mut bot = self.build();
        if let Err(e) = bot.start().await {
            panic!("TestBot failed to start: {e}");
        }
        bot
    }
}
