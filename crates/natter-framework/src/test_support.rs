//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::command::CommandParser;
use crate::context::BotHandle;
use crate::flow::{FlowEngine, FlowOptions};
use crate::registry::CallbackRegistry;
use natter_core::{
    Identifier, Message, Messenger, RoomRegistry, StreamRequest, TransportError,
    TransportResult,
};

/// A messenger that records everything it is asked to send.
#[derive(Default)]
pub(crate) struct RecordingMessenger {
    sent: Mutex<Vec<Message>>,
    known: Mutex<Vec<Identifier>>,
    notify: Notify,
}

impl RecordingMessenger {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn know(&self, who: Identifier) {
        self.known.lock().push(who);
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub(crate) fn bodies(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.body.clone()).collect()
    }

    /// Waits until at least `count` messages were sent.
    pub(crate) async fn wait_for(&self, count: usize) -> Vec<String> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.sent.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("timed out waiting for {count} messages, got {:?}", self.bodies());
        }
        self.bodies()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn bot_identifier(&self) -> Identifier {
        Identifier::new("bot")
    }

    async fn send_message(&self, message: Message) -> TransportResult<()> {
        self.sent.lock().push(message);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn send_stream(&self, _request: StreamRequest) -> TransportResult<()> {
        Err(TransportError::Unsupported("send_stream"))
    }

    fn resolve_identifier(&self, name: &str) -> Option<Identifier> {
        self.known
            .lock()
            .iter()
            .find(|id| id.person() == name || id.nick() == name)
            .cloned()
    }
}

pub(crate) fn direct(from: &str, body: &str) -> Message {
    Message::direct(body, Identifier::new(from), Identifier::new("bot"))
}

pub(crate) fn in_room(from: &str, room: &str, body: &str) -> Message {
    Message::in_room(body, Identifier::new(from), room)
}

/// A bot handle over `messenger` with prefix `!` and `admin` as the only admin.
pub(crate) fn bot_handle(messenger: Arc<RecordingMessenger>) -> BotHandle {
    let parser = Arc::new(CommandParser::new("!"));
    let flows = FlowEngine::new(
        messenger.clone(),
        Arc::clone(&parser),
        FlowOptions {
            workers: 2,
            backlog: 16,
            ..FlowOptions::default()
        },
    );
    BotHandle::new(
        messenger,
        Arc::new(RoomRegistry::new()),
        Arc::new(CallbackRegistry::new()),
        flows,
        parser,
        vec!["admin".to_owned()],
    )
}
