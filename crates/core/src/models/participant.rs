//! Participant roster entries

use serde::{Deserialize, Serialize};

use super::RoomId;

/// One participant in a room's live roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEntry {
    pub participant_id: String,
    pub display_name: String,
    pub is_local: bool,
    pub is_host: bool,
}

impl ParticipantEntry {
    /// Display name with the fallback used when the backend reports none
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            "Anonymous"
        } else {
            &self.display_name
        }
    }
}

/// Host request asking one participant to move, published on the move topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub participant_id: String,
    pub room: RoomId,
}

impl MoveRequest {
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Emoji reaction broadcast to everyone in the meeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub sender: String,
    pub emoji: String,
}

impl Reaction {
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
