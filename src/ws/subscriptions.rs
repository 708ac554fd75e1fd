//! Subscription parameters, canonical keys, and desired-set tracking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shared::{Chain, PairAddress, TableType};

/// Filters applied server-side to a scanner table room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerFilterParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<Chain>,
    #[serde(rename = "minVol24H", skip_serializing_if = "Option::is_none")]
    pub min_volume_24h: Option<f64>,
    #[serde(rename = "maxVol24H", skip_serializing_if = "Option::is_none")]
    pub max_volume_24h: Option<f64>,
    /// Maximum pair age in hours.
    #[serde(rename = "maxAge", skip_serializing_if = "Option::is_none")]
    pub max_age_hours: Option<u32>,
    #[serde(rename = "minMcap", skip_serializing_if = "Option::is_none")]
    pub min_market_cap: Option<f64>,
    #[serde(rename = "maxMcap", skip_serializing_if = "Option::is_none")]
    pub max_market_cap: Option<f64>,
    /// Exclude pairs flagged as honeypots.
    #[serde(rename = "isNotHP", default)]
    pub exclude_honeypots: bool,
}

/// Parameters of one subscription. Subscribe and unsubscribe share them,
/// discriminated by [`MessageOut`](crate::ws::MessageOut).
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeParams {
    /// Room-style subscription for one scanner table.
    ScannerFilter {
        table: TableType,
        filter: ScannerFilterParams,
    },
    /// Audit updates for one pair.
    PairStats { pair: PairAddress, chain: Chain },
    /// Price ticks for one pair.
    Pair { pair: PairAddress, chain: Chain },
}

/// The `{pair, chain}` params object of per-pair rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairParams<'a> {
    pub pair: &'a PairAddress,
    pub chain: Chain,
}

impl SubscribeParams {
    pub fn pair(pair: PairAddress, chain: Chain) -> Self {
        Self::Pair { pair, chain }
    }

    pub fn pair_stats(pair: PairAddress, chain: Chain) -> Self {
        Self::PairStats { pair, chain }
    }

    pub fn scanner_filter(table: TableType, filter: ScannerFilterParams) -> Self {
        Self::ScannerFilter { table, filter }
    }

    /// Wire event name of the subscribe form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScannerFilter { .. } => "scanner-filter",
            Self::PairStats { .. } => "pair-stats",
            Self::Pair { .. } => "pair",
        }
    }

    /// Room name: the table for scanner filters, the pair otherwise.
    pub fn room(&self) -> &str {
        match self {
            Self::ScannerFilter { table, .. } => table.as_str(),
            Self::PairStats { pair, .. } | Self::Pair { pair, .. } => pair.as_str(),
        }
    }

    pub fn params_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::ScannerFilter { filter, .. } => serde_json::to_value(filter),
            Self::PairStats { pair, chain } | Self::Pair { pair, chain } => {
                serde_json::to_value(PairParams { pair, chain: *chain })
            }
        }
    }

    /// Canonical key of this subscription: kind plus room.
    ///
    /// A scanner filter for a table has one key whatever its filter values,
    /// so replacing a table's filter replaces its tracked entry.
    pub fn subscription_key(&self) -> String {
        match self {
            Self::ScannerFilter { table, .. } => format!("scanner-filter:{}", table),
            Self::PairStats { pair, chain } => format!("pair-stats:{}:{}", chain, pair),
            Self::Pair { pair, chain } => format!("pair:{}:{}", chain, pair),
        }
    }
}

/// Desired subscriptions, replayed after every reconnect.
///
/// Keyed by [`SubscribeParams::subscription_key`]; replay order is by key.
#[derive(Debug, Clone, Default)]
pub struct DesiredSubscriptions {
    entries: BTreeMap<String, SubscribeParams>,
}

impl DesiredSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a subscription. Returns whether the key was new.
    pub fn insert(&mut self, params: SubscribeParams) -> bool {
        let key = params.subscription_key();
        let is_new = !self.entries.contains_key(&key);
        if is_new {
            tracing::debug!("Tracking subscription: {}", key);
        }
        self.entries.insert(key, params);
        is_new
    }

    /// Stop tracking a subscription. Returns whether it was tracked.
    pub fn remove(&mut self, params: &SubscribeParams) -> bool {
        let removed = self.entries.remove(&params.subscription_key()).is_some();
        if removed {
            tracing::debug!("Removed subscription from tracking: {}", params.subscription_key());
        }
        removed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<SubscribeParams> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
