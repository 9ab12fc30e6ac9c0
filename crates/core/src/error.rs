//! Error types for Roomhop Core

use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Room allocation failed: {0}")]
    AllocationFailure(String),

    #[error("Switch already in progress")]
    SwitchInProgress,

    #[error("Room switch failed: {0}")]
    SwitchFailure(String),

    #[error("Relay requests are not supported by the media backend")]
    RelayUnsupported,

    #[error("Relay already active between {source_room} and {target_room}")]
    RelayConflict {
        source_room: String,
        target_room: String,
    },

    #[error("Relay failed: {0}")]
    RelayFailure(String),

    #[error("Relay source and target must differ")]
    SameRoom,

    #[error("Malformed directory snapshot: {0}")]
    DirectoryParse(String),

    #[error("Invalid room name: {0:?}")]
    InvalidName(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Cannot delete the current room")]
    CurrentRoom,

    #[error("Room is the target of a switch in progress")]
    RoomInUse,

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Operation requires the host role")]
    NotHost,

    #[error("Reaction has no emoji")]
    EmptyReaction,

    #[error("Session closed")]
    SessionClosed,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification handed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AllocationFailure,
    SwitchInProgress,
    SwitchFailure,
    RelayUnsupported,
    RelayConflict,
    RelayFailure,
    DirectoryParseFailure,
    InvalidRequest,
    Backend,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AllocationFailure(_) => ErrorKind::AllocationFailure,
            Error::SwitchInProgress => ErrorKind::SwitchInProgress,
            Error::SwitchFailure(_) => ErrorKind::SwitchFailure,
            Error::RelayUnsupported => ErrorKind::RelayUnsupported,
            Error::RelayConflict { .. } => ErrorKind::RelayConflict,
            Error::RelayFailure(_) => ErrorKind::RelayFailure,
            Error::DirectoryParse(_) => ErrorKind::DirectoryParseFailure,
            Error::SameRoom
            | Error::InvalidName(_)
            | Error::RoomNotFound(_)
            | Error::CurrentRoom
            | Error::RoomInUse
            | Error::ParticipantNotFound(_)
            | Error::NotHost
            | Error::EmptyReaction => ErrorKind::InvalidRequest,
            Error::Backend(_) => ErrorKind::Backend,
            Error::SessionClosed
            | Error::Config(_)
            | Error::InvalidConfig(_)
            | Error::Io(_)
            | Error::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
