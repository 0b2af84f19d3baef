//! Error types for rumor-broadcast.

use thiserror::Error;

/// Result type for rumor-broadcast operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the broadcast protocol.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport rejected a message or a request body was malformed.
    #[error(transparent)]
    Transport(#[from] rumor_transport::Error),

    /// The retry pump is no longer running.
    #[error("retry pump has stopped")]
    PumpStopped,
}

impl From<Error> for rumor_transport::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Transport(inner) => inner,
            Error::PumpStopped => rumor_transport::Error::Closed,
        }
    }
}
