//! Hub protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hub protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// First message from a client
    Hello { client_id: Uuid, name: String },

    /// Hub accepts the client
    Welcome { client_id: Uuid },

    /// Hub refuses the client
    Rejected { reason: String },

    /// Open a subscription. Deliveries for it carry `subscription`.
    Subscribe { subscription: u64, topic: String },

    /// Subscription is live; any retained payload has already been delivered
    Subscribed { subscription: u64 },

    /// Publish to every subscription on `topic`
    Publish {
        request_id: u64,
        topic: String,
        payload: String,
        persist: bool,
    },

    /// Publish fanned out
    Published { request_id: u64 },

    /// A subscribe or publish was refused
    Failed { request_id: u64, reason: String },

    /// Payload for one subscription
    Delivery {
        subscription: u64,
        topic: String,
        payload: String,
    },

    Ping,

    Pong,

    /// Hub is shutting down
    ServerShutdown,
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
