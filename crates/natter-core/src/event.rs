//! The inbound event union drained by the dispatch loop.

use std::fmt;

use crate::identity::Identifier;
use crate::message::{Message, Presence};

/// One inbound unit of work.
#[derive(Debug, Clone)]
pub enum Event {
    /// A chat message, direct or in a room.
    Message(Message),
    /// A participant's availability changed.
    Presence(Presence),
    /// Room membership or topic changed.
    Room(RoomEvent),
    /// In-band control signal for the dispatch loop itself.
    Control(Control),
}

impl Event {
    /// The terminator event: once dequeued, the dispatch loop stops intake.
    pub fn stop() -> Self {
        Event::Control(Control::Stop)
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Event::Control(Control::Stop))
    }

    /// Short name used in logs and spans.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Message(_) => "message",
            Event::Presence(_) => "presence",
            Event::Room(RoomEvent::Joined { .. }) => "room_joined",
            Event::Room(RoomEvent::Left { .. }) => "room_left",
            Event::Room(RoomEvent::Topic { .. }) => "room_topic",
            Event::Control(_) => "control",
        }
    }
}

impl From<Message> for Event {
    fn from(message: Message) -> Self {
        Event::Message(message)
    }
}

impl From<Presence> for Event {
    fn from(presence: Presence) -> Self {
        Event::Presence(presence)
    }
}

impl From<RoomEvent> for Event {
    fn from(event: RoomEvent) -> Self {
        Event::Room(event)
    }
}

/// Room membership and topic notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Joined {
        room: String,
        occupant: Identifier,
    },
    Left {
        room: String,
        occupant: Identifier,
    },
    Topic {
        room: String,
        topic: Option<String>,
    },
}

impl RoomEvent {
    pub fn room(&self) -> &str {
        match self {
            RoomEvent::Joined { room, .. }
            | RoomEvent::Left { room, .. }
            | RoomEvent::Topic { room, .. } => room,
        }
    }
}

/// Control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Control {
    /// Graceful stop: finish in-flight work, pull nothing further.
    Stop,
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Stop => f.write_str("stop"),
        }
    }
}
