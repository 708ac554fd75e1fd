//! # scanner-feed
//!
//! Live-data feed pipeline for DEX token scanners: one WebSocket connection,
//! per-pair subscriptions that follow the rows the app is showing, and
//! batched price / audit updates.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core**: Newtypes, wire payloads, the table state container
//! 2. **Timers**: Keyed, cancellable timers owned by each component
//! 3. **WebSocket**: Messages, endpoint checks, rate limit, `tokio-tungstenite` transport
//! 4. **Subscriptions**: Visible-set diffing, chunked deltas, retry state machine
//! 5. **Aggregator**: Per-table batch buffers with debounce and size-triggered flushes
//! 6. **Pipeline**: `FeedPipeline`, the three wired together with `start` / `stop`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scanner_feed::prelude::*;
//! use std::sync::{Arc, Mutex};
//!
//! let store = Arc::new(Mutex::new(TableStore::new()));
//! let mut pipeline = FeedPipeline::start(FeedConfig::default(), Arc::clone(&store)).await?;
//!
//! pipeline.set_scanner_filter(TableType::from("trending"), ScannerFilterParams::default()).await?;
//! pipeline.update_visible_tokens(vec![PairAddress::from("0x...")]).await?;
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes used across all modules.
pub mod shared;

/// Domain modules (vertical slices): update records, wire types, state.
pub mod domain;

/// Unified error types.
pub mod error;

/// Network URL constants.
pub mod network;

/// Pipeline configuration.
pub mod config;

// ── Layer 2: Timers ──────────────────────────────────────────────────────────

pub mod timer;

// ── Layer 3: WebSocket ───────────────────────────────────────────────────────

/// WebSocket client: messages, subscriptions, events.
pub mod ws;

// ── Layer 4–5: Subscriptions, aggregation ────────────────────────────────────

pub mod subscriptions;

pub mod aggregator;

// ── Layer 6: Pipeline ────────────────────────────────────────────────────────

/// `FeedPipeline`: the primary entry point.
#[cfg(feature = "ws-native")]
pub mod pipeline;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared newtypes
    pub use crate::shared::{Chain, PairAddress, TableType};

    // Domain types
    pub use crate::domain::pair::{
        AuditPatch, AuditUpdate, PairRow, PriceUpdate, TableBatch, TableStore,
    };

    // Errors
    pub use crate::error::{FeedError, ValidationError, WsError};

    // Config
    pub use crate::aggregator::AggregatorConfig;
    pub use crate::config::FeedConfig;
    pub use crate::subscriptions::SubscriptionConfig;
    pub use crate::ws::WsConfig;

    // Network
    pub use crate::network::DEFAULT_WS_URL;

    // WebSocket types
    pub use crate::ws::{
        CallbackId, ConnectionState, Kind, MessageOut, ScannerFilterParams, SubscribeParams,
        WsEvent,
    };

    // Subscriptions + aggregation
    pub use crate::aggregator::{BatchSink, TrackedQuote};
    pub use crate::subscriptions::{SubscriptionRecord, SubscriptionStats, SubscriptionStatus};

    // Pipeline
    #[cfg(feature = "ws-native")]
    pub use crate::pipeline::FeedPipeline;
    #[cfg(feature = "ws-native")]
    pub use crate::ws::native::WsClient;
}
