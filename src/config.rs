//! Pipeline configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "ws": { "url": "wss://feed.example.com/ws" }, "aggregator": { "debounce_ms": 250 } }
//! ```

use serde::{Deserialize, Serialize};

use crate::aggregator::AggregatorConfig;
use crate::error::FeedError;
use crate::subscriptions::SubscriptionConfig;
use crate::ws::{validate_endpoint, WsConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub ws: WsConfig,
    pub subscriptions: SubscriptionConfig,
    pub aggregator: AggregatorConfig,
}

impl FeedConfig {
    /// Parse a JSON config and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, FeedError> {
        let config: FeedConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), FeedError> {
        let ws = &self.ws;
        validate_endpoint(&ws.url, ws.hardened)?;
        non_zero("ws.rate_limit_max_messages", ws.rate_limit_max_messages as u64)?;
        non_zero("ws.rate_limit_window_ms", ws.rate_limit_window_ms)?;
        non_zero("ws.max_callbacks", ws.max_callbacks as u64)?;
        non_zero("ws.max_outgoing_message_bytes", ws.max_outgoing_message_bytes as u64)?;
        non_zero("ws.max_incoming_message_bytes", ws.max_incoming_message_bytes as u64)?;
        non_zero("ws.ping_interval_ms", ws.ping_interval_ms)?;
        non_zero("ws.pong_timeout_ms", ws.pong_timeout_ms)?;
        if ws.base_reconnect_delay_ms > ws.max_reconnect_delay_ms {
            return Err(FeedError::Config(format!(
                "ws.base_reconnect_delay_ms ({}) exceeds ws.max_reconnect_delay_ms ({})",
                ws.base_reconnect_delay_ms, ws.max_reconnect_delay_ms
            )));
        }

        let subs = &self.subscriptions;
        non_zero("subscriptions.batch_size", subs.batch_size as u64)?;
        non_zero(
            "subscriptions.max_concurrent_subscriptions",
            subs.max_concurrent_subscriptions as u64,
        )?;
        non_zero("subscriptions.subscription_timeout_ms", subs.subscription_timeout_ms)?;

        non_zero("aggregator.max_batch_size", self.aggregator.max_batch_size as u64)?;
        Ok(())
    }
}

fn non_zero(field: &str, value: u64) -> Result<(), FeedError> {
    if value == 0 {
        return Err(FeedError::Config(format!("{} must be greater than zero", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Chain;

    #[test]
    fn test_defaults_are_valid() {
        assert!(FeedConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = FeedConfig::from_json_str(
            r#"{"ws":{"url":"wss://feed.example.com/ws"},"subscriptions":{"chain":"SOL","batch_size":10}}"#,
        )
        .unwrap();
        assert_eq!(config.ws.url, "wss://feed.example.com/ws");
        assert_eq!(config.ws.max_reconnect_attempts, 5);
        assert_eq!(config.subscriptions.chain, Chain::Sol);
        assert_eq!(config.subscriptions.batch_size, 10);
        assert_eq!(config.subscriptions.debounce_ms, 150);
        assert_eq!(config.aggregator.max_batch_size, 50);
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let mut config = FeedConfig::default();
        config.aggregator.max_batch_size = 0;
        assert!(matches!(config.validate(), Err(FeedError::Config(msg)) if msg.contains("max_batch_size")));

        let mut config = FeedConfig::default();
        config.subscriptions.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = FeedConfig::default();
        config.ws.rate_limit_window_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let mut config = FeedConfig::default();
        config.ws.base_reconnect_delay_ms = 60_000;
        assert!(matches!(config.validate(), Err(FeedError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let mut config = FeedConfig::default();
        config.ws.url = "ftp://feed.example.com".into();
        assert!(matches!(config.validate(), Err(FeedError::Ws(_))));

        assert!(FeedConfig::from_json_str("{not json").is_err());
    }
}
