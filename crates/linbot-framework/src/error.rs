//! Error types for the Linbot framework.

use thiserror::Error;

/// Errors that can occur while building handler arguments.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The event does not satisfy the parameter's declared type.
    #[error("event type mismatch: expected '{expected}', got '{got}'")]
    EventTypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Name of the event that was dispatched.
        got: String,
    },

    /// The handler asks for command arguments but its matcher produced none.
    #[error("no command arguments were extracted for this event")]
    MissingCommandArgs,

    /// The handler asks for a bot but the dispatch has none.
    #[error("no bot is bound to this dispatch")]
    MissingBot,

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// A handler fault, caught at the dispatcher boundary.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// An argument could not be built.
    #[error("failed to extract arguments: {0}")]
    Extract(#[from] ExtractError),

    /// The handler returned an error.
    #[error("{0}")]
    Failed(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Result of one handler invocation.
pub type HandlerResult = Result<(), HandlerError>;
