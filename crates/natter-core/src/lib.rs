//! # natter core
//!
//! Primitives shared by every layer of the natter chatbot runtime:
//!
//! - **Addressing**: [`Identifier`] (person or room occupant) and the
//!   canonical [`RoomRegistry`]
//! - **Events**: the inbound [`Event`] union and the [`event_queue`] that
//!   carries it from the transport to the dispatch loop
//! - **Boundaries**: the [`Transport`] a chat network implements, the
//!   [`Messenger`] handlers send through and the [`Renderer`] that turns
//!   markup into the network's dialect
//!
//! ```text
//! ┌───────────┐  enqueue  ┌─────────────┐  dequeue  ┌───────────────┐
//! │ Transport │──────────▶│ Event Queue │──────────▶│ Dispatch Loop │
//! └───────────┘           └─────────────┘           └───────────────┘
//!       ▲                                                   │
//!       └──────────── Messenger (render + send) ◀───────────┘
//! ```

pub mod error;
pub mod event;
pub mod identity;
pub mod message;
pub mod messenger;
pub mod queue;
pub mod render;
pub mod room;
pub mod transport;

pub use error::{
    QueueError, QueueResult, RenderError, RoomError, TransportError, TransportResult,
};
pub use event::{Control, Event, RoomEvent};
pub use identity::Identifier;
pub use message::{Address, Message, Presence, Status, StreamRequest};
pub use messenger::{BoxedMessenger, Messenger};
pub use queue::{EventReceiver, EventSender, event_queue};
pub use render::{BoxedRenderer, PlainText, Renderer, Verbatim};
pub use room::{Room, RoomRegistry};
pub use transport::{BoxedTransport, Transport};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        Address, Event, EventSender, Identifier, Message, Messenger, Presence, Room,
        RoomEvent, RoomRegistry, Status, Transport, TransportError, TransportResult,
    };
}
