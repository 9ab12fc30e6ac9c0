//! Room registry - the host's authoritative table of rooms
//!
//! Ordered by creation. Only the host's own event loop mutates it, and
//! every mutation is followed by a full directory publish.

use crate::error::{Error, Result};
use crate::invariants::assert_registry_invariants;
use crate::models::{DirectoryEntry, DirectorySnapshot, ExternalSessionId, Room, RoomId};

/// Outcome of adding a room
#[derive(Debug, Clone)]
pub struct RoomAdded {
    pub room: Room,
    /// The registry was empty, so this room became the host's current room
    pub designated_current: bool,
}

/// Outcome of a delete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomRemoval {
    Removed(Room),
    /// Unknown id; nothing changed
    Unknown,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Vec<Room>,
    current: Option<RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a requested room name, returning it trimmed
    pub fn normalize_name(name: &str) -> Result<String> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(trimmed.to_string())
    }

    /// Append a room whose external session has already been allocated
    pub fn add(&mut self, name: &str, external_session_id: ExternalSessionId) -> Result<RoomAdded> {
        let name = Self::normalize_name(name)?;
        if self.find_by_session(&external_session_id).is_some() {
            return Err(Error::AllocationFailure(format!(
                "session {} already bound to a room",
                external_session_id
            )));
        }

        // Ids are random v4 UUIDs, so a deleted room's id does not come back
        let room = Room::new(name, external_session_id);

        let designated_current = self.rooms.is_empty();
        if designated_current {
            self.current = Some(room.id);
        }
        self.rooms.push(room.clone());

        assert_registry_invariants(&self.rooms, self.current);
        tracing::info!(room_id = %room.id, name = %room.name, session = %room.external_session_id, "Room added");

        Ok(RoomAdded {
            room,
            designated_current,
        })
    }

    /// Remove a room. The host's current room cannot be removed.
    pub fn remove(&mut self, id: RoomId) -> Result<RoomRemoval> {
        let Some(index) = self.rooms.iter().position(|r| r.id == id) else {
            return Ok(RoomRemoval::Unknown);
        };
        if self.current == Some(id) {
            return Err(Error::CurrentRoom);
        }

        let room = self.rooms.remove(index);
        assert_registry_invariants(&self.rooms, self.current);
        tracing::info!(room_id = %room.id, name = %room.name, "Room removed");
        Ok(RoomRemoval::Removed(room))
    }

    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn find_by_session(&self, session: &ExternalSessionId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.external_session_id == session)
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn current(&self) -> Option<RoomId> {
        self.current
    }

    /// Repoint the host's current room after a switch resolves
    pub fn set_current(&mut self, id: Option<RoomId>) {
        debug_assert!(
            id.map_or(true, |id| self.get(id).is_some()),
            "current room {:?} is not registered",
            id
        );
        self.current = id;
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Project onto the wire-level snapshot
    pub fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot::new(self.rooms.iter().map(DirectoryEntry::from).collect())
    }
}
