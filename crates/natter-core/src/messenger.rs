//! Outbound sending as seen by handlers.
//!
//! Handlers never talk to the transport directly. They get a [`Messenger`],
//! which the runtime implements by rendering the body and forwarding it to
//! the transport.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::identity::Identifier;
use crate::message::{Address, Message, StreamRequest};

#[async_trait]
pub trait Messenger: Send + Sync {
    /// The bot's own identity.
    fn bot_identifier(&self) -> Identifier;

    /// Renders and sends `message`. Rendering happens exactly once.
    async fn send_message(&self, message: Message) -> TransportResult<()>;

    async fn send_stream(&self, request: StreamRequest) -> TransportResult<()>;

    /// Resolves a mention name to a known participant.
    fn resolve_identifier(&self, name: &str) -> Option<Identifier>;

    /// Sends a plain body to a person or room.
    async fn send_text(&self, to: Address, body: String) -> TransportResult<()> {
        let message = Message::new(body, self.bot_identifier(), to);
        self.send_message(message).await
    }

    /// Replies to `origin` in the place it came from.
    async fn reply(&self, origin: &Message, body: String) -> TransportResult<()> {
        self.send_message(origin.reply(self.bot_identifier(), body))
            .await
    }
}

/// A shared, type-erased messenger.
pub type BoxedMessenger = Arc<dyn Messenger>;
