//! Error types for stores, actions and the dispatcher.
//!
//! Covers the failure taxonomy of the engine:
//! - structural failures (malformed actions, malformed paths)
//! - domain validation rejections from per-type validators
//! - time-travel index errors
//! - deferred task failures

use thiserror::Error;

/// Errors that can occur while reading or writing stores and dispatching actions.
#[derive(Debug, Error)]
pub enum StateError {
    /// A dot-separated path or listener pattern is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A write would have to descend through a non-container value.
    #[error("path conflict at '{path}': '{segment}' is not an object")]
    PathConflict { path: String, segment: String },

    /// The dispatched item is not a well-formed action.
    #[error("structural error: {0}")]
    Structural(String),

    /// A per-type validator rejected the action payload.
    #[error("validation failed for {action_type}: {reason}")]
    DomainValidation { action_type: String, reason: String },

    /// A history index is outside the recorded range.
    #[error("history index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// A deferred task was dispatched outside a tokio runtime.
    #[error("no async runtime available to run deferred task")]
    NoRuntime,

    /// A deferred task failed or was aborted before producing an action.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Error type returned by listener callbacks.
///
/// Listener failures never propagate out of the store; they are logged.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

impl StateError {
    /// Returns true if this error rejects the shape or content of an action.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StateError::Structural(_) | StateError::DomainValidation { .. }
        )
    }

    pub(crate) fn structural(msg: impl Into<String>) -> Self {
        StateError::Structural(msg.into())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::SerializationError(err.to_string())
    }
}
