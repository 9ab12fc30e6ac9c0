//! Roomhop Network Library
//!
//! Carries the room directory and move requests between processes.
//!
//! # Architecture
//!
//! - **Hub**: Topic-based pub/sub server, retains persisted payloads
//! - **HubClient**: Connects to a hub and implements [`roomhop_core::PubSub`]
//! - **Protocol**: Length-prefixed JSON messages
//! - **RoomLink**: Shareable `?room=` links for a single room
//!
//! # Usage
//!
//! ```ignore
//! // Somebody runs the hub
//! let hub = Hub::start(DEFAULT_PORT).await?;
//!
//! // Host and participants connect and hand the client to a session
//! let client = Arc::new(HubClient::connect(addr, "host").await?);
//! let session = Session::spawn(backend, client, observer, SessionOptions::host("Host")).await?;
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod hub;
pub mod link;
pub mod protocol;

pub use client::{ConnectionState, HubClient};
pub use error::{Error, Result};
pub use hub::Hub;
pub use link::RoomLink;
pub use protocol::Message;

/// Default port for a Roomhop hub
pub const DEFAULT_PORT: u16 = 7331;
