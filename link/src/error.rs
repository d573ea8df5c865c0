//! Error types for lab-link.

use thiserror::Error;

/// Errors returned by the synchronization client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabLinkError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The server did not answer a request within the configured timeout.
    #[error("Request timeout: {0}")]
    TimeoutError(String),

    /// The server refused the request (invalid or unauthorized path).
    #[error("Request rejected ({code}): {message}")]
    RequestRejected { code: String, message: String },

    /// The connection dropped while a request was in flight.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LabLinkError {
    /// `true` for failures that only mean "no fresh data right now".
    ///
    /// UI callers are expected to fall back to cached or default data on
    /// these instead of surfacing an error.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LabLinkError::TimeoutError(_)
                | LabLinkError::RequestRejected { .. }
                | LabLinkError::ConnectionLost(_)
                | LabLinkError::NotConnected(_)
        )
    }
}

impl From<serde_json::Error> for LabLinkError {
    fn from(err: serde_json::Error) -> Self {
        LabLinkError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for LabLinkError {
    fn from(err: toml::de::Error) -> Self {
        LabLinkError::ConfigurationError(format!("Invalid TOML: {}", err))
    }
}

impl From<std::io::Error> for LabLinkError {
    fn from(err: std::io::Error) -> Self {
        LabLinkError::ConfigurationError(err.to_string())
    }
}

/// Result type for lab-link operations.
pub type Result<T> = std::result::Result<T, LabLinkError>;
