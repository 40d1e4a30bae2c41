//! In-memory room registry.
//!
//! Stores but never decides: all lifecycle transitions are driven by the
//! coordinator, which is the registry's sole owner. Serialization comes from
//! that ownership — the registry is held inside the coordinator task and is
//! never shared behind a lock.

use std::collections::HashMap;

use crate::models::room::Room;

/// Authoritative table of room state keyed by room name.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the room for `name`, creating it in EMPTY if unseen.
    ///
    /// For the lifetime of a registration this always yields the same room;
    /// a name only maps to a fresh value after an explicit [`remove`](Self::remove).
    pub fn get_or_create(&mut self, name: &str) -> &mut Room {
        self.rooms
            .entry(name.to_owned())
            .or_insert_with(|| Room::new(name.to_owned()))
    }

    /// Look up a room by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    /// Look up a room mutably by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Room> {
        self.rooms.get_mut(name)
    }

    /// Iterate all registered rooms.
    pub fn all(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    /// All room names currently registered.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Remove a room, returning it if it was registered.
    pub fn remove(&mut self, name: &str) -> Option<Room> {
        self.rooms.remove(name)
    }

    /// Number of registered rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether the registry holds no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
