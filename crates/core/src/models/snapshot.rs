//! Directory snapshot - the wire projection of the room registry

use serde::{Deserialize, Serialize};

use super::{ExternalSessionId, Room, RoomId};

/// One room as seen by participants (creation time stays host-local)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: RoomId,
    pub name: String,
    #[serde(rename = "meetingId")]
    pub external_session_id: ExternalSessionId,
}

impl From<&Room> for DirectoryEntry {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            name: room.name.clone(),
            external_session_id: room.external_session_id.clone(),
        }
    }
}

/// Full room list as published by the host; always a complete replacement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub rooms: Vec<DirectoryEntry>,
}

impl DirectorySnapshot {
    pub fn new(rooms: Vec<DirectoryEntry>) -> Self {
        Self { rooms }
    }

    /// Serialize to the JSON payload carried on the directory topic
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a directory payload
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn find(&self, id: RoomId) -> Option<&DirectoryEntry> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn find_by_session(&self, session: &ExternalSessionId) -> Option<&DirectoryEntry> {
        self.rooms.iter().find(|r| &r.external_session_id == session)
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_uses_meeting_id_key() {
        let snapshot = DirectorySnapshot::new(vec![DirectoryEntry {
            id: RoomId::new(),
            name: "Alpha".to_string(),
            external_session_id: "ext-1".into(),
        }]);

        let payload = snapshot.to_payload().unwrap();
        assert!(payload.contains("\"meetingId\":\"ext-1\""));
        assert!(payload.starts_with("{\"rooms\":["));
        assert!(!payload.contains("created"));
    }

    #[test]
    fn test_payload_rejects_missing_rooms() {
        assert!(DirectorySnapshot::from_payload("{\"meetings\":[]}").is_err());
        assert!(DirectorySnapshot::from_payload("not json").is_err());
    }
}
