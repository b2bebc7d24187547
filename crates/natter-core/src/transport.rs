//! The transport capability interface.
//!
//! A transport is the only thing that knows about a chat network. The core
//! holds it as `Arc<dyn Transport>` and relies on nothing beyond this trait:
//! inbound traffic is pushed into the [`EventSender`] handed to
//! [`Transport::connect`], outbound traffic leaves through
//! [`Transport::send_message`].
//!
//! # Example
//!
//! ```rust,ignore
//! struct Loopback { me: Identifier }
//!
//! #[async_trait]
//! impl Transport for Loopback {
//!     fn bot_identifier(&self) -> Identifier { self.me.clone() }
//!
//!     async fn connect(&self, events: EventSender) -> TransportResult<()> {
//!         tokio::spawn(async move { /* read the network, events.enqueue(..) */ });
//!         Ok(())
//!     }
//!
//!     async fn send_message(&self, message: Message) -> TransportResult<()> {
//!         println!("{}", message.body);
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{TransportError, TransportResult};
use crate::identity::Identifier;
use crate::message::{Message, StreamRequest};
use crate::queue::EventSender;

/// A chat-network backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        "transport"
    }

    /// Who the bot is on this network.
    fn bot_identifier(&self) -> Identifier;

    /// Connects and starts feeding inbound events into `events`.
    ///
    /// Returns once the connection is established; reading continues in the
    /// background until the queue closes.
    async fn connect(&self, events: EventSender) -> TransportResult<()>;

    /// Sends a fully rendered message.
    async fn send_message(&self, message: Message) -> TransportResult<()>;

    /// Offers a stream (file transfer) to a participant.
    async fn send_stream_request(&self, request: StreamRequest) -> TransportResult<()> {
        let _ = request;
        Err(TransportError::Unsupported("send_stream_request"))
    }

    /// Resolves a name seen in an `@name` mention to a known participant.
    fn resolve_identifier(&self, name: &str) -> Option<Identifier>;

    /// Called once the dispatch loop is running.
    async fn on_connect(&self) {}

    /// Called once during shutdown, after all handler work has drained.
    async fn on_disconnect(&self) {}
}

/// A shared, type-erased transport.
pub type BoxedTransport = Arc<dyn Transport>;
