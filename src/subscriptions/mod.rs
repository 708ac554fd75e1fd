//! Subscription manager: keeps the server-side subscription set in line with
//! the pairs the app currently shows.
//!
//! [`SubscriptionManager`] holds the per-pair records, the visible set and the
//! chunk queues; [`service::spawn`] runs one inside its own task and hands back
//! a cloneable [`SubscriptionHandle`].

pub mod manager;
pub mod service;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WsError;
use crate::shared::{Chain, PairAddress};
use crate::ws::MessageOut;

pub use manager::SubscriptionManager;
pub use service::{spawn, SubscriptionHandle};

// ─── Outbound seam ───────────────────────────────────────────────────────────

/// Where the manager sends subscribe/unsubscribe messages.
pub trait MessageSink {
    fn send(&self, msg: MessageOut) -> Result<(), WsError>;
}

impl<T: MessageSink + ?Sized> MessageSink for std::sync::Arc<T> {
    fn send(&self, msg: MessageOut) -> Result<(), WsError> {
        (**self).send(msg)
    }
}

#[cfg(feature = "ws-native")]
impl MessageSink for crate::ws::native::WsClient {
    fn send(&self, msg: MessageOut) -> Result<(), WsError> {
        crate::ws::native::WsClient::send(self, msg)
    }
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Subscribed,
    Error,
    Unsubscribed,
}

impl SubscriptionStatus {
    /// Pending and subscribed records count against the concurrency ceiling.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Subscribed)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Subscribed => "subscribed",
            Self::Error => "error",
            Self::Unsubscribed => "unsubscribed",
        };
        f.write_str(s)
    }
}

/// State of one tracked pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRecord {
    pub pair: PairAddress,
    pub status: SubscriptionStatus,
    pub retry_count: u32,
    pub subscribed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SubscriptionRecord {
    fn pending(pair: PairAddress, retry_count: u32) -> Self {
        Self {
            pair,
            status: SubscriptionStatus::Pending,
            retry_count,
            subscribed_at: None,
            error_message: None,
        }
    }
}

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    pub total: usize,
    pub pending: usize,
    pub subscribed: usize,
    pub error: usize,
    pub unsubscribed: usize,
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_concurrent_subscriptions: usize,
    pub subscription_timeout_ms: u64,
    /// Pairs per subscribe/unsubscribe chunk.
    pub batch_size: usize,
    /// Pause between chunks.
    pub batch_delay_ms: u64,
    /// Quiet period coalescing visible-set changes.
    pub debounce_ms: u64,
    pub chain: Chain,
    /// Also subscribe to `pair-stats` for every visible pair.
    pub subscribe_pair_stats: bool,
    /// Mark records subscribed as soon as the send is admitted. When off,
    /// records stay pending until inbound data for the pair arrives or the
    /// subscription timeout fails them.
    pub confirm_on_send: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            max_concurrent_subscriptions: 100,
            subscription_timeout_ms: 10_000,
            batch_size: 5,
            batch_delay_ms: 100,
            debounce_ms: 150,
            chain: Chain::Eth,
            subscribe_pair_stats: false,
            confirm_on_send: true,
        }
    }
}

impl SubscriptionConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_timeout_ms)
    }

    /// Backoff before the retry following failure number `retry_count` (from 1).
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(20);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(1u64 << exp))
    }
}
