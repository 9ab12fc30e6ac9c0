//! Directory channel - host to participant room list broadcast
//!
//! The host publishes the full registry snapshot with `persist` after every
//! change; participants replace their local copy wholesale on every
//! payload. There are no deltas and no merges.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{DirectoryEntry, DirectorySnapshot, ExternalSessionId, RoomId};
use crate::pubsub::{PubSub, PublishOptions};

/// One-way broadcast of directory snapshots on a pub/sub topic
#[derive(Clone)]
pub struct DirectoryChannel {
    pubsub: Arc<dyn PubSub>,
    topic: String,
}

impl DirectoryChannel {
    pub fn new(pubsub: Arc<dyn PubSub>, topic: impl Into<String>) -> Self {
        Self {
            pubsub,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a full snapshot, retained for late subscribers
    pub async fn publish(&self, snapshot: &DirectorySnapshot) -> Result<()> {
        let payload = snapshot.to_payload()?;
        self.pubsub
            .publish(&self.topic, payload, PublishOptions::persist())
            .await?;
        info!(topic = %self.topic, rooms = snapshot.rooms.len(), "Directory published");
        Ok(())
    }

    /// Subscribe to raw snapshot payloads, latest retained one first
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<String>> {
        Ok(self.pubsub.subscribe(&self.topic).await?)
    }
}

/// Result of applying a payload to the local directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryUpdate {
    Replaced,
    /// Payload equal to what we already hold
    Unchanged,
}

/// A participant's read-only copy of the host's directory
#[derive(Debug, Default)]
pub struct LocalDirectory {
    snapshot: DirectorySnapshot,
    received: bool,
}

impl LocalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a raw payload. Malformed payloads leave the previous snapshot in place.
    pub fn apply_payload(&mut self, payload: &str) -> Result<DirectoryUpdate> {
        let snapshot = DirectorySnapshot::from_payload(payload)
            .map_err(|e| Error::DirectoryParse(e.to_string()))?;
        self.apply(snapshot)
    }

    /// Replace the local copy wholesale
    pub fn apply(&mut self, snapshot: DirectorySnapshot) -> Result<DirectoryUpdate> {
        let mut seen = HashSet::new();
        if let Some(dup) = snapshot.rooms.iter().find(|r| !seen.insert(r.id)) {
            warn!(room_id = %dup.id, "Snapshot repeats a room id");
            return Err(Error::DirectoryParse(format!("duplicate room id {}", dup.id)));
        }

        if self.received && self.snapshot == snapshot {
            debug!("Directory snapshot unchanged");
            return Ok(DirectoryUpdate::Unchanged);
        }

        self.snapshot = snapshot;
        self.received = true;
        debug!(rooms = self.snapshot.rooms.len(), "Directory replaced");
        Ok(DirectoryUpdate::Replaced)
    }

    /// Whether any snapshot has been received yet
    pub fn has_snapshot(&self) -> bool {
        self.received
    }

    pub fn rooms(&self) -> &[DirectoryEntry] {
        &self.snapshot.rooms
    }

    pub fn find(&self, id: RoomId) -> Option<&DirectoryEntry> {
        self.snapshot.find(id)
    }

    pub fn find_by_session(&self, session: &ExternalSessionId) -> Option<&DirectoryEntry> {
        self.snapshot.find_by_session(session)
    }
}
