//! Error types for cqlwire-client.

use thiserror::Error;

/// Main error type for all driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Initial TCP connect failed; no connection task was started.
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Request submitted before the handshake completed.
    #[error("Connection not ready")]
    NotReady,

    /// Every stream id is in use.
    #[error("Too many requests in flight")]
    TooManyRequests,

    /// No correlated response arrived before the deadline.
    #[error("Request timed out")]
    Timeout,

    /// Server asked for an authenticator this driver cannot speak.
    #[error("Unknown auth mechanism: {0}")]
    UnknownAuthMechanism(String),

    /// Frame that is well formed but not allowed in the current state.
    #[error("Bad response: {0}")]
    BadResponse(String),

    /// Malformed frame or body.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Connection closed (by the server, by a fatal error, or by shutdown).
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ERROR response from the server, scoped to one request.
    #[error("Server error {code:#06x}: {message}")]
    Server { code: i32, message: String },

    /// Reply of a kind the issued request cannot produce.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Request that cannot be encoded, rejected before it is submitted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl DriverError {
    /// True for errors that end the connection rather than a single call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::UnknownAuthMechanism(_)
                | DriverError::BadResponse(_)
                | DriverError::Decode(_)
                | DriverError::ConnectionClosed
                | DriverError::Io(_)
        )
    }
}

/// Result type alias using DriverError.
pub type Result<T> = std::result::Result<T, DriverError>;
