//! External media/session collaborator interface
//!
//! The core never talks to a media service directly. Everything it needs
//! (room allocation, join/leave, retarget, relay requests and membership
//! events) goes through the traits in this module.
//!
//! Calls on a [`MediaSession`] only *initiate* an operation. Completion is
//! reported asynchronously as a [`SessionEvent`] pushed into the
//! [`EventSink`] the session was opened with, so the client's event loop
//! can keep handling commands while it waits.

pub mod loopback;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{ExternalSessionId, MediaKind, ParticipantEntry};

pub use loopback::{LoopbackBackend, LoopbackOptions};

/// Errors reported by the media backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Capability unavailable: {0}")]
    Unsupported(&'static str),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Identity of one session binding instance on this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(pub Uuid);

impl BindingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BindingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local media publishing flags for a join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaFlags {
    pub mic: bool,
    pub webcam: bool,
}

impl MediaFlags {
    pub fn off() -> Self {
        Self::default()
    }
}

/// Parameters for opening a session against an external session id
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub session_id: ExternalSessionId,
    pub display_name: String,
    pub media: MediaFlags,
    pub is_host: bool,
}

/// Membership and lifecycle events emitted by a media session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Join acknowledged; carries the session's membership at join time
    SessionJoined { participants: Vec<ParticipantEntry> },
    /// Leave completed
    SessionLeft,
    ParticipantJoined(ParticipantEntry),
    ParticipantLeft { participant_id: String },
    Error(String),
}

/// A session event tagged with the binding it belongs to
#[derive(Debug, Clone)]
pub struct BindingEvent {
    pub binding: BindingId,
    pub event: SessionEvent,
}

/// Where a media session delivers its events
#[derive(Debug, Clone)]
pub struct EventSink {
    binding: BindingId,
    tx: mpsc::UnboundedSender<BindingEvent>,
}

impl EventSink {
    pub fn new(binding: BindingId, tx: mpsc::UnboundedSender<BindingEvent>) -> Self {
        Self { binding, tx }
    }

    pub fn binding(&self) -> BindingId {
        self.binding
    }

    /// Deliver an event; returns false once the client loop is gone
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx
            .send(BindingEvent {
                binding: self.binding,
                event,
            })
            .is_ok()
    }
}

/// Media backend: allocates rooms and opens sessions
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Allocate a new external session for a room
    async fn allocate_room(&self) -> Result<ExternalSessionId, BackendError>;

    /// Open a session handle; nothing is joined until [`MediaSession::join`]
    fn open(&self, request: JoinRequest, sink: EventSink) -> Result<Box<dyn MediaSession>, BackendError>;
}

/// One client's handle on an external session
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// The external session this handle currently targets
    fn session_id(&self) -> &ExternalSessionId;

    /// Start joining; acknowledged by `SessionJoined`
    async fn join(&mut self) -> Result<(), BackendError>;

    /// Start leaving; acknowledged by `SessionLeft`
    async fn leave(&mut self) -> Result<(), BackendError>;

    fn supports_retarget(&self) -> bool {
        false
    }

    /// Move the joined session to another external session in place.
    /// Events after the move are delivered to `sink`.
    async fn retarget(
        &mut self,
        _target: &ExternalSessionId,
        _sink: EventSink,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("retarget"))
    }

    /// Ask the service to bring media from `source` into this session
    async fn request_relay(
        &mut self,
        _source: &ExternalSessionId,
        _kinds: &[MediaKind],
    ) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("relay"))
    }
}
