//! Error types for rumor-transport.

use thiserror::Error;

/// Result type for rumor-transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exchanging messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading from or writing to the underlying stream failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An envelope could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A message body did not have the shape its type requires.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// No handler is registered for this message type.
    #[error("unsupported message type: {0}")]
    NotSupported(String),

    /// The node has not received its `init` message yet.
    #[error("node has not been initialized")]
    NotInitialized,

    /// The outbound channel has been closed.
    #[error("transport closed")]
    Closed,
}

impl Error {
    /// The wire error code reported to the sender when a handler fails.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MalformedRequest(_) | Self::Serialization(_) => ErrorCode::MalformedRequest,
            Self::NotSupported(_) => ErrorCode::NotSupported,
            Self::NotInitialized | Self::Closed => ErrorCode::TemporarilyUnavailable,
            Self::Io(_) => ErrorCode::Crash,
        }
    }
}

/// Error codes carried by `error` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    NodeNotFound,
    NotSupported,
    TemporarilyUnavailable,
    MalformedRequest,
    Crash,
    Abort,
}

impl ErrorCode {
    /// Numeric value on the wire.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Timeout => 0,
            Self::NodeNotFound => 1,
            Self::NotSupported => 10,
            Self::TemporarilyUnavailable => 11,
            Self::MalformedRequest => 12,
            Self::Crash => 13,
            Self::Abort => 14,
        }
    }

    /// Parse a numeric wire code.
    #[must_use]
    pub const fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Timeout),
            1 => Some(Self::NodeNotFound),
            10 => Some(Self::NotSupported),
            11 => Some(Self::TemporarilyUnavailable),
            12 => Some(Self::MalformedRequest),
            13 => Some(Self::Crash),
            14 => Some(Self::Abort),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::NodeNotFound => write!(f, "node-not-found"),
            Self::NotSupported => write!(f, "not-supported"),
            Self::TemporarilyUnavailable => write!(f, "temporarily-unavailable"),
            Self::MalformedRequest => write!(f, "malformed-request"),
            Self::Crash => write!(f, "crash"),
            Self::Abort => write!(f, "abort"),
        }
    }
}
