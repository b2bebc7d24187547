//! Participant addressing.
//!
//! A single [`Identifier`] type covers both a plain person and a room
//! occupant: an occupant is simply an identifier whose `room` is set.
//!
//! Equality follows the addressing rules of the runtime:
//!
//! - two persons are equal when their person handles match; client, nick,
//!   full name and email are presentation only;
//! - two occupants are equal when both the person handle and the room match;
//! - a person never equals an occupant.
//!
//! [`Identifier::same_person`] compares handles only and is what callers want
//! when asking "is this the same human regardless of where they spoke?".
//!
//! # Example
//!
//! ```rust,ignore
//! let alice = Identifier::new("alice").with_nick("Ali");
//! let in_room = alice.clone().in_room("#general");
//!
//! assert_eq!(alice, Identifier::new("alice"));
//! assert_ne!(alice, in_room);
//! assert!(alice.same_person(&in_room));
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A chat participant, optionally scoped to a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    person: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nick: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fullname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room: Option<String>,
}

impl Identifier {
    /// Creates a person identifier from its handle.
    pub fn new(person: impl Into<String>) -> Self {
        Self {
            person: person.into(),
            client: None,
            nick: None,
            fullname: None,
            email: None,
            room: None,
        }
    }

    /// Creates an occupant of `room`.
    pub fn occupant(person: impl Into<String>, room: impl Into<String>) -> Self {
        Self::new(person).in_room(room)
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_nick(mut self, nick: impl Into<String>) -> Self {
        self.nick = Some(nick.into());
        self
    }

    pub fn with_fullname(mut self, fullname: impl Into<String>) -> Self {
        self.fullname = Some(fullname.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Scopes this identifier to a room, turning it into an occupant.
    pub fn in_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Drops the room scope, returning the underlying person.
    pub fn to_person(&self) -> Self {
        Self {
            room: None,
            ..self.clone()
        }
    }

    /// The person handle, the only identity-bearing field of a person.
    pub fn person(&self) -> &str {
        &self.person
    }

    pub fn client(&self) -> Option<&str> {
        self.client.as_deref()
    }

    /// Display nick, falling back to the person handle.
    pub fn nick(&self) -> &str {
        self.nick.as_deref().unwrap_or(&self.person)
    }

    pub fn fullname(&self) -> Option<&str> {
        self.fullname.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The room this occupant is in, if any.
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn is_occupant(&self) -> bool {
        self.room.is_some()
    }

    /// Compares person handles only, ignoring room scope.
    pub fn same_person(&self, other: &Identifier) -> bool {
        self.person == other.person
    }

    /// Compares as occupants: person handle and room must both match.
    ///
    /// Two identifiers without a room are never the same occupant.
    pub fn same_occupant(&self, other: &Identifier) -> bool {
        self.person == other.person && self.room.is_some() && self.room == other.room
    }

    /// The `@nick` form used when addressing someone inside a room.
    pub fn mention(&self) -> String {
        format!("@{}", self.nick())
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        match (&self.room, &other.room) {
            (None, None) => self.same_person(other),
            (Some(_), Some(_)) => self.same_occupant(other),
            _ => false,
        }
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.person.hash(state);
        self.room.hash(state);
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.room, &self.client) {
            (Some(room), _) => write!(f, "{}@{}", self.person, room),
            (None, Some(client)) => write!(f, "{}/{}", self.person, client),
            (None, None) => f.write_str(&self.person),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_person_equality_ignores_presentation() {
        let a = Identifier::new("alice")
            .with_nick("Ali")
            .with_client("laptop")
            .with_email("a@example.org");
        let b = Identifier::new("alice").with_fullname("Alice Liddell");
        assert_eq!(a, b);
        assert_ne!(a, Identifier::new("bob"));
    }

    #[test]
    fn test_occupant_equality_requires_room() {
        let a = Identifier::occupant("alice", "#one");
        assert_eq!(a, Identifier::occupant("alice", "#one").with_nick("x"));
        assert_ne!(a, Identifier::occupant("alice", "#two"));
        assert_ne!(a, Identifier::occupant("bob", "#one"));
    }

    #[test]
    fn test_person_never_equals_occupant() {
        let person = Identifier::new("alice");
        let occupant = person.clone().in_room("#one");
        assert_ne!(person, occupant);
        assert!(person.same_person(&occupant));
        assert!(!person.same_occupant(&occupant));
        assert_eq!(occupant.to_person(), person);
    }

    #[test]
    fn test_hash_agrees_with_eq() {
        let mut set = HashSet::new();
        set.insert(Identifier::new("alice").with_nick("one"));
        set.insert(Identifier::new("alice").with_nick("two"));
        set.insert(Identifier::occupant("alice", "#room"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display_and_mention() {
        assert_eq!(Identifier::new("alice").to_string(), "alice");
        assert_eq!(
            Identifier::new("alice").with_client("cli").to_string(),
            "alice/cli"
        );
        assert_eq!(Identifier::occupant("alice", "#r").to_string(), "alice@#r");
        assert_eq!(Identifier::new("alice").mention(), "@alice");
        assert_eq!(Identifier::new("alice").with_nick("Ali").mention(), "@Ali");
    }
}
