//! Relay state

use serde::{Deserialize, Serialize};

use super::RoomId;

/// Kinds of media a relay request may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// Observable relay state of one client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayState {
    pub active: bool,
    pub source_room_id: Option<RoomId>,
    pub target_room_id: Option<RoomId>,
}

impl RelayState {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn active(source: RoomId, target: RoomId) -> Self {
        Self {
            active: true,
            source_room_id: Some(source),
            target_room_id: Some(target),
        }
    }

    /// Whether the relay references the given room on either side
    pub fn touches(&self, room: RoomId) -> bool {
        self.source_room_id == Some(room) || self.target_room_id == Some(room)
    }
}
