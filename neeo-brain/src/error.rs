//! Error types for the neeo-brain crate.

use brain_transport::TransportError;

/// Errors that can occur while managing a brain session.
#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    /// The brain answered with a status other than `200 OK`
    #[error("Brain returned HTTP {status}: {body}")]
    Transport {
        /// The HTTP status code
        status: u16,
        /// The response body
        body: String,
    },

    /// Socket or connection failure while talking to the brain
    #[error("I/O error: {0}")]
    Io(String),

    /// The operation was attempted in an invalid state
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// The running task was cancelled
    #[error("Operation interrupted")]
    Interrupted,

    /// The brain returned a body that could not be decoded
    #[error("Failed to parse brain response: {0}")]
    Parse(String),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BrainError {
    /// Whether a failed connect attempt should be retried after this error.
    ///
    /// Everything except an interruption is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BrainError::Interrupted)
    }

    /// Whether this error comes from talking to the brain (status or socket)
    pub fn is_communication(&self) -> bool {
        matches!(self, BrainError::Transport { .. } | BrainError::Io(_))
    }
}

impl From<TransportError> for BrainError {
    fn from(err: TransportError) -> Self {
        BrainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BrainError {
    fn from(err: serde_json::Error) -> Self {
        BrainError::Parse(err.to_string())
    }
}

/// Convenience type alias for Results using BrainError.
pub type Result<T> = std::result::Result<T, BrainError>;
