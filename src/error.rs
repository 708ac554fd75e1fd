//! Unified feed error types.

use thiserror::Error;

/// Top-level feed error.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0} has stopped")]
    ServiceStopped(&'static str),
}

/// WebSocket errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Outgoing rate limit reached ({limit} messages per {window_ms}ms)")]
    RateLimited { limit: usize, window_ms: u64 },

    #[error("Message too large: {size} bytes (limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Connection closed: code={code:?} reason={reason}")]
    Closed { code: Option<u16>, reason: String },
}

/// Inbound / outbound message validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    #[error("Missing payload for {0}")]
    MissingPayload(String),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

impl ValidationError {
    pub(crate) fn invalid(kind: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidPayload {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for WsError {
    fn from(err: serde_json::Error) -> Self {
        WsError::InvalidMessage(err.to_string())
    }
}

#[cfg(feature = "ws-native")]
impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => WsError::NotConnected,
            Error::Url(e) => WsError::InvalidUrl(e.to_string()),
            Error::Http(resp) => {
                WsError::ConnectionFailed(format!("HTTP error: {:?}", resp.status()))
            }
            other => WsError::ConnectionFailed(other.to_string()),
        }
    }
}
