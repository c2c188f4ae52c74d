//! Error types for the request transport

use thiserror::Error;

/// Errors that can occur while talking HTTP to a brain
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure or a broken body
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The underlying HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_builder() {
            TransportError::Client(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
