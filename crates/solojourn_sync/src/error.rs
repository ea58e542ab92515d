//! Error types for the sync core.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync core.
///
/// Store operations return these as values; a failed request never leaves a
/// store half-mutated.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Frame or body could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] solojourn_protocol::ProtocolError),

    /// The server rejected the request (`{success: false}`).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The HTTP layer failed.
    #[error("http error: {0}")]
    Http(String),

    /// JSON encoding/decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key-value storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No session token is stored.
    #[error("no session token stored")]
    MissingToken,

    /// Not connected to the event hub.
    #[error("not connected to server")]
    NotConnected,

    /// The operation was cancelled (the store was closed mid-request).
    #[error("operation cancelled")]
    Cancelled,

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Another mutation of the same field is still awaiting confirmation.
    #[error("mutation already in flight for {0}")]
    MutationInFlight(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Http(_) => true,
            SyncError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection refused").is_retryable());
        assert!(!SyncError::transport_fatal("handshake rejected").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::MissingToken.is_retryable());
        assert!(!SyncError::Rejected("Post not found".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err = SyncError::MutationInFlight("post p1 like".into());
        assert!(err.to_string().contains("p1"));
    }
}
