//! Network error types

use std::io;

use roomhop_core::BackendError;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Request failed: {0}")]
    Failed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Hub full")]
    HubFull,

    #[error("Invalid room link: {0}")]
    InvalidLink(String),
}

impl From<Error> for BackendError {
    fn from(e: Error) -> Self {
        match e {
            Error::Failed(reason) | Error::Rejected(reason) => BackendError::Rejected(reason),
            other => BackendError::Unavailable(other.to_string()),
        }
    }
}
