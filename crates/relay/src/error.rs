//! Error types for the relay.

use crate::registry::ConnectionId;

/// Errors that can occur while accepting, serving or configuring connections.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The HTTP upgrade to WebSocket did not complete. Nothing was registered.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// The peer went away, either with a close frame or by dropping the stream.
    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    #[error("Connection idle for {0:?}")]
    IdleTimeout(std::time::Duration),

    /// A structured-mode frame did not match `{clientId, message}`.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<axum::Error> for RelayError {
    fn from(err: axum::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<figment::Error> for RelayError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
