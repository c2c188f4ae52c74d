//! Error types for the callback server

use thiserror::Error;

/// Errors that can occur while starting the callback server
#[derive(Debug, Error)]
pub enum CallbackServerError {
    /// Every port of the configured range is taken
    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// The server task exited before signalling readiness
    #[error("Server failed to start: {0}")]
    Startup(String),
}
