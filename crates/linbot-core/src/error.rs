//! Unified error types for the Linbot core.
//!
//! Framework-level errors (extraction and handler faults) live in
//! `linbot-framework`; configuration and runtime errors in `linbot-runtime`.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur while moving frames over a connection.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The outbound document could not be encoded.
    #[error("failed to encode outbound document: {0}")]
    Encode(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Event Errors
// =============================================================================

/// Errors raised while turning an inbound frame into an [`Event`](crate::Event).
#[derive(Debug, Error)]
pub enum EventError {
    /// The frame is not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The frame is not a JSON document of the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for outbound action calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No connection is available to carry the request.
    #[error("bot is not connected")]
    NotConnected,

    /// No reply arrived before the correlation timeout elapsed.
    #[error("API call timed out")]
    Timeout,

    /// The gateway answered with a non-zero return code.
    #[error("API error ({retcode}): {message}")]
    Failed {
        /// The `retcode` field of the reply.
        retcode: i64,
        /// The `message` or `wording` field of the reply.
        message: String,
    },

    /// Failed to serialize or deserialize a document.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No target could be derived for the action.
    #[error("missing session info: {0}")]
    MissingSession(&'static str),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl ApiError {
    /// Returns `true` for the correlation timeout failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for action calls.
pub type ApiResult<T> = Result<T, ApiError>;
