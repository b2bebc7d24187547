//! The canonical room set.
//!
//! Every room the bot knows about lives in one [`RoomRegistry`] owned by the
//! bot instance. Mutations go through the registry by room name, under a
//! single writer lock, so nobody ever mutates a detached copy and membership
//! is never observed half-updated. Reads hand out [`Room`] snapshots.
//!
//! When the registry is wired to an event queue, every successful membership
//! or topic change raises a [`RoomEvent`] on the queue's notify lane.

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::RoomError;
use crate::event::RoomEvent;
use crate::identity::Identifier;
use crate::queue::EventSender;

/// A snapshot of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub name: String,
    pub occupants: Vec<Identifier>,
    pub topic: Option<String>,
}

impl Room {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            occupants: Vec::new(),
            topic: None,
        }
    }

    /// Whether `who` (compared by person handle) is in this room.
    pub fn contains(&self, who: &Identifier) -> bool {
        self.occupants.iter().any(|o| o.same_person(who))
    }
}

/// Lock-protected, ordered set of rooms.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<Vec<Room>>,
    events: Option<EventSender>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that reports changes on `events`.
    pub fn with_events(events: EventSender) -> Self {
        Self {
            rooms: RwLock::new(Vec::new()),
            events: Some(events),
        }
    }

    /// Snapshot of the canonical room called `name`.
    pub fn find_canonical(&self, name: &str) -> Option<Room> {
        self.rooms.read().iter().find(|r| r.name == name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.rooms.read().iter().any(|r| r.name == name)
    }

    /// Names of all rooms, in creation order.
    pub fn rooms(&self) -> Vec<String> {
        self.rooms.read().iter().map(|r| r.name.clone()).collect()
    }

    /// Names of the rooms `who` is currently in.
    pub fn joined(&self, who: &Identifier) -> Vec<String> {
        self.rooms
            .read()
            .iter()
            .filter(|r| r.contains(who))
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn occupants(&self, name: &str) -> Option<Vec<Identifier>> {
        self.find_canonical(name).map(|r| r.occupants)
    }

    /// Creates an empty room. Returns `false` (and warns) if it already exists.
    pub fn create(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write();
        if rooms.iter().any(|r| r.name == name) {
            warn!(room = %name, "Room already exists");
            return false;
        }
        rooms.push(Room::new(name));
        info!(room = %name, "Room created");
        true
    }

    /// Removes a room. Returns `false` (and warns) if it does not exist.
    pub fn destroy(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write();
        let Some(index) = rooms.iter().position(|r| r.name == name) else {
            warn!(room = %name, "Cannot destroy a room that does not exist");
            return false;
        };
        rooms.remove(index);
        info!(room = %name, "Room destroyed");
        true
    }

    /// Adds `who` to `name`, creating the room first if it does not exist.
    ///
    /// Joining a room one is already in is a warned no-op returning `false`.
    pub fn join(&self, name: &str, who: &Identifier) -> bool {
        let occupant = who.to_person().in_room(name);
        {
            let mut rooms = self.rooms.write();
            let index = match rooms.iter().position(|r| r.name == name) {
                Some(index) => index,
                None => {
                    info!(room = %name, "Room does not exist, creating it on join");
                    rooms.push(Room::new(name));
                    rooms.len() - 1
                }
            };
            let room = &mut rooms[index];
            if room.contains(who) {
                warn!(room = %name, person = %who.person(), "Already in room, ignoring join");
                return false;
            }
            room.occupants.push(occupant.clone());
        }
        debug!(room = %name, person = %who.person(), "Joined room");
        self.emit(RoomEvent::Joined {
            room: name.to_owned(),
            occupant,
        });
        true
    }

    /// Removes `who` from `name`.
    ///
    /// Leaving a room one is not in (or that does not exist) is a warned
    /// no-op returning `false`; nothing is mutated.
    pub fn leave(&self, name: &str, who: &Identifier) -> bool {
        let occupant = {
            let mut rooms = self.rooms.write();
            let Some(room) = rooms.iter_mut().find(|r| r.name == name) else {
                warn!(room = %name, person = %who.person(), "Cannot leave a room that does not exist");
                return false;
            };
            let Some(index) = room.occupants.iter().position(|o| o.same_person(who)) else {
                warn!(room = %name, person = %who.person(), "Not in room, ignoring leave");
                return false;
            };
            room.occupants.remove(index)
        };
        debug!(room = %name, person = %who.person(), "Left room");
        self.emit(RoomEvent::Left {
            room: name.to_owned(),
            occupant,
        });
        true
    }

    /// Sets or clears the topic of an existing room.
    pub fn set_topic(&self, name: &str, topic: Option<String>) -> Result<(), RoomError> {
        {
            let mut rooms = self.rooms.write();
            let room = rooms
                .iter_mut()
                .find(|r| r.name == name)
                .ok_or_else(|| RoomError::NotFound(name.to_owned()))?;
            room.topic = topic.clone();
        }
        self.emit(RoomEvent::Topic {
            room: name.to_owned(),
            topic,
        });
        Ok(())
    }

    fn emit(&self, event: RoomEvent) {
        if let Some(events) = &self.events
            && events.notify(event).is_err()
        {
            debug!("Event queue closed, room notification dropped");
        }
    }
}
