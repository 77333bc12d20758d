//! Error types for shorewire.

use thiserror::Error;

/// Main error type for all relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The offshore relay could not be reached at startup.
    #[error("relay unreachable after {attempts} connection attempts")]
    RelayUnavailable {
        /// How many dial attempts were made before giving up.
        attempts: u32,
    },

    /// Relay connection closed while an exchange was in flight.
    #[error("relay connection closed")]
    ConnectionClosed,

    /// An HTTP request that cannot be parsed.
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// The upstream request could not be constructed.
    #[error("failed to build upstream request: {0}")]
    RequestBuild(String),

    /// The destination could not be reached or misbehaved.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Result type alias using RelayError.
pub type Result<T> = std::result::Result<T, RelayError>;
