//! Inbound and outbound payloads: messages, presence updates and stream
//! (file transfer) requests.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::Identifier;

/// Where a message is going: a single person or a whole room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Address {
    Person(Identifier),
    Room(String),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Person(id) => write!(f, "{id}"),
            Address::Room(room) => f.write_str(room),
        }
    }
}

/// A chat message.
///
/// `frm` is the sender; for a room message it is an occupant of that room.
/// `extras` carries transport-specific data the core passes through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub body: String,
    pub frm: Identifier,
    pub to: Address,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

impl Message {
    pub fn new(body: impl Into<String>, frm: Identifier, to: Address) -> Self {
        Self {
            body: body.into(),
            frm,
            to,
            extras: Map::new(),
        }
    }

    /// A one-to-one message from `frm` to `to`.
    pub fn direct(body: impl Into<String>, frm: Identifier, to: Identifier) -> Self {
        Self::new(body, frm, Address::Person(to))
    }

    /// A message posted in a room by one of its occupants.
    pub fn in_room(body: impl Into<String>, frm: Identifier, room: impl Into<String>) -> Self {
        let room = room.into();
        let frm = if frm.room() == Some(room.as_str()) {
            frm
        } else {
            frm.in_room(room.clone())
        };
        Self::new(body, frm, Address::Room(room))
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.to, Address::Person(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self.to, Address::Room(_))
    }

    /// The room this message was posted in, if any.
    pub fn room(&self) -> Option<&str> {
        match &self.to {
            Address::Room(room) => Some(room),
            Address::Person(_) => None,
        }
    }

    /// Builds a reply sent by `bot`: back to the room for room messages,
    /// otherwise to the sender directly.
    pub fn reply(&self, bot: Identifier, body: impl Into<String>) -> Message {
        let to = match &self.to {
            Address::Room(room) => Address::Room(room.clone()),
            Address::Person(_) => Address::Person(self.frm.to_person()),
        };
        let mut reply = Message::new(body, bot, to);
        reply
            .extras
            .insert("in_reply_to".into(), Value::String(self.frm.person().to_owned()));
        reply
    }
}

/// Availability of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Online,
    Away,
    DoNotDisturb,
    Offline,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Online => "online",
            Status::Away => "away",
            Status::DoNotDisturb => "dnd",
            Status::Offline => "offline",
        })
    }
}

/// A presence change reported by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub identifier: Identifier,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Presence {
    pub fn new(identifier: Identifier, status: Status) -> Self {
        Self {
            identifier,
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// An offer to stream content (typically a file) to a participant.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub to: Identifier,
    pub name: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

impl StreamRequest {
    pub fn new(to: Identifier, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            to,
            name: name.into(),
            content: content.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_message_scopes_sender() {
        let msg = Message::in_room("hi", Identifier::new("alice"), "#general");
        assert!(msg.is_group());
        assert_eq!(msg.room(), Some("#general"));
        assert_eq!(msg.frm.room(), Some("#general"));
    }

    #[test]
    fn test_reply_targets() {
        let bot = Identifier::new("bot");
        let direct = Message::direct("hi", Identifier::new("alice"), bot.clone());
        assert_eq!(
            direct.reply(bot.clone(), "yo").to,
            Address::Person(Identifier::new("alice"))
        );

        let group = Message::in_room("hi", Identifier::new("alice"), "#general");
        let reply = group.reply(bot, "yo");
        assert_eq!(reply.to, Address::Room("#general".into()));
        assert_eq!(reply.extras["in_reply_to"], "alice");
    }
}
