//! WebSocket layer: messages, subscriptions, events.
//!
//! The transport lives in `native.rs` behind the `ws-native` feature
//! (`tokio-tungstenite`). This module defines the shared message/event
//! types, plus the pieces of the connection manager that do not touch the
//! socket: endpoint validation, the outgoing rate limiter and the message
//! callback registry.

pub mod callbacks;
pub mod endpoint;
pub mod rate_limit;
pub mod subscriptions;

#[cfg(feature = "ws-native")]
pub mod native;

use std::time::Duration;

use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

use crate::domain::pair::wire::{PairStatsData, ScannerPairsData, TickData};
use crate::error::{ValidationError, WsError};
use crate::shared::PairAddress;

pub use callbacks::{CallbackId, CallbackRegistry, MessageCallback};
pub use endpoint::validate_endpoint;
pub use rate_limit::RateLimiter;
pub use subscriptions::{DesiredSubscriptions, ScannerFilterParams, SubscribeParams};

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Messages sent from client to server.
///
/// Serialized as `{"event": <kind>, "data": {"room": ..., "params": {...}}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOut {
    Subscribe(SubscribeParams),
    Unsubscribe(SubscribeParams),
}

impl MessageOut {
    pub fn subscribe_pair(pair: PairAddress, chain: crate::shared::Chain) -> Self {
        Self::Subscribe(SubscribeParams::pair(pair, chain))
    }

    pub fn unsubscribe_pair(pair: PairAddress, chain: crate::shared::Chain) -> Self {
        Self::Unsubscribe(SubscribeParams::pair(pair, chain))
    }

    pub fn subscribe_pair_stats(pair: PairAddress, chain: crate::shared::Chain) -> Self {
        Self::Subscribe(SubscribeParams::pair_stats(pair, chain))
    }

    pub fn unsubscribe_pair_stats(pair: PairAddress, chain: crate::shared::Chain) -> Self {
        Self::Unsubscribe(SubscribeParams::pair_stats(pair, chain))
    }

    pub fn params(&self) -> &SubscribeParams {
        match self {
            Self::Subscribe(params) | Self::Unsubscribe(params) => params,
        }
    }

    /// Wire event name, e.g. `pair` or `unsubscribe-pair`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(params) => params.kind(),
            Self::Unsubscribe(params) => match params {
                SubscribeParams::ScannerFilter { .. } => "unsubscribe-scanner-filter",
                SubscribeParams::PairStats { .. } => "unsubscribe-pair-stats",
                SubscribeParams::Pair { .. } => "unsubscribe-pair",
            },
        }
    }

    /// Check the message shape, serialize it, and enforce `max_bytes`.
    pub fn encode(&self, max_bytes: usize) -> Result<String, WsError> {
        if self.params().room().trim().is_empty() {
            return Err(WsError::InvalidMessage(format!("{}: empty room", self.kind())));
        }
        let json = serde_json::to_string(self)?;
        if json.len() > max_bytes {
            return Err(WsError::MessageTooLarge {
                size: json.len(),
                limit: max_bytes,
            });
        }
        Ok(json)
    }
}

impl Serialize for MessageOut {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Data<'a> {
            room: &'a str,
            params: serde_json::Value,
        }

        let params = self.params();
        let data = Data {
            room: params.room(),
            params: params.params_json().map_err(S::Error::custom)?,
        };

        let mut out = serializer.serialize_struct("MessageOut", 2)?;
        out.serialize_field("event", self.kind())?;
        out.serialize_field("data", &data)?;
        out.end()
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Tick(TickData),
    PairStats(PairStatsData),
    ScannerPairs(ScannerPairsData),
}

/// Both envelope shapes the feed uses.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvelope {
    Wire {
        event: String,
        #[serde(default)]
        data: serde_json::Value,
    },
    Internal {
        kind: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl Kind {
    /// Decode and validate a payload for a named message kind.
    pub fn decode(kind: &str, payload: serde_json::Value) -> Result<Self, ValidationError> {
        if payload.is_null() {
            return Err(ValidationError::MissingPayload(kind.to_string()));
        }
        let invalid = |e: serde_json::Error| ValidationError::invalid(kind, e.to_string());

        match kind {
            "tick" => {
                let tick: TickData = serde_json::from_value(payload).map_err(invalid)?;
                tick.validate()?;
                Ok(Kind::Tick(tick))
            }
            "pair-stats" => {
                let stats: PairStatsData = serde_json::from_value(payload).map_err(invalid)?;
                stats.validate()?;
                Ok(Kind::PairStats(stats))
            }
            "scanner-pairs" => {
                let pairs: ScannerPairsData = serde_json::from_value(payload).map_err(invalid)?;
                pairs.validate()?;
                Ok(Kind::ScannerPairs(pairs))
            }
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kind::Tick(_) => "tick",
            Kind::PairStats(_) => "pair-stats",
            Kind::ScannerPairs(_) => "scanner-pairs",
        }
    }

    /// The pair a per-pair message is about.
    pub fn pair(&self) -> Option<&PairAddress> {
        match self {
            Kind::Tick(tick) => Some(&tick.pair_address),
            Kind::PairStats(stats) => Some(&stats.pair_address),
            Kind::ScannerPairs(_) => None,
        }
    }
}

/// Parse one text frame in either `{event, data}` or `{kind, payload}` shape.
pub fn decode_frame(text: &str) -> Result<Kind, ValidationError> {
    let envelope: RawEnvelope =
        serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    match envelope {
        RawEnvelope::Wire { event, data } => Kind::decode(&event, data),
        RawEnvelope::Internal { kind, payload } => Kind::decode(&kind, payload),
    }
}

// ─── WsEvent ─────────────────────────────────────────────────────────────────

/// High-level events emitted by the WS client to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    /// A validated message from the server.
    Message(Kind),
    /// Connection established (first connect or reconnect).
    Connected,
    /// Connection lost (may trigger reconnect).
    Disconnected { code: Option<u16>, reason: String },
    /// A transport or protocol error.
    Error(String),
    /// Every reconnect attempt failed; the client is in its terminal state.
    MaxReconnectReached,
}

// ─── ConnectionState ─────────────────────────────────────────────────────────

/// Connection state, stored atomically per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Connected = 1,
    Disconnected = 2,
    Error = 3,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            3 => ConnectionState::Error,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

// ─── WsConfig ────────────────────────────────────────────────────────────────

/// Configuration for the WS client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    pub url: String,
    /// Require `wss` and refuse loopback/private hosts.
    pub hardened: bool,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub reconnect_jitter: bool,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub max_outgoing_message_bytes: usize,
    pub max_incoming_message_bytes: usize,
    pub rate_limit_max_messages: usize,
    pub rate_limit_window_ms: u64,
    pub max_callbacks: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: crate::network::DEFAULT_WS_URL.to_string(),
            hardened: false,
            max_reconnect_attempts: 5,
            base_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            reconnect_jitter: false,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 10_000,
            max_outgoing_message_bytes: 10 * 1024,
            max_incoming_message_bytes: 1024 * 1024,
            rate_limit_max_messages: 100,
            rate_limit_window_ms: 60_000,
            max_callbacks: 50,
        }
    }
}

impl WsConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// Delay before reconnect attempt `attempt` (counted from 0), without jitter.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self
            .base_reconnect_delay_ms
            .saturating_mul(factor)
            .min(self.max_reconnect_delay_ms);
        Duration::from_millis(delay)
    }
}
