//! Error types for frame encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame names an event this client does not understand.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The event is synthesized by the client and never crosses the wire.
    #[error("event {0} is local to the client and has no wire form")]
    LocalOnly(String),

    /// The frame or its payload is not valid JSON for the named event.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
