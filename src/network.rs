//! Network URL constants.

/// Default scanner feed WebSocket URL.
pub const DEFAULT_WS_URL: &str = "wss://api.scanner-feed.io/ws";
