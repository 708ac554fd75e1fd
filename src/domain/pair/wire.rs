//! Wire-level pair payloads as the feed sends them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ValidationError;
use crate::shared::serde_util::{lenient_decimal, timestamp_ms};
use crate::shared::{PairAddress, TableType};

/// `tick`: a trade-driven price update for one pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickData {
    pub pair_address: PairAddress,
    #[serde(with = "lenient_decimal")]
    pub price_usd: Decimal,
    /// Set upstream when the tick deviates too far from recent prices.
    #[serde(default)]
    pub is_outlier: bool,
    #[serde(with = "timestamp_ms")]
    pub timestamp: DateTime<Utc>,
}

impl TickData {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pair_address.is_empty() {
            return Err(ValidationError::invalid("tick", "empty pairAddress"));
        }
        if self.price_usd.is_sign_negative() {
            return Err(ValidationError::invalid(
                "tick",
                format!("negative price {}", self.price_usd),
            ));
        }
        Ok(())
    }
}

/// `pair-stats`: audit flags for one pair. Fields absent from the payload
/// are left untouched on the receiving row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStatsData {
    pub pair_address: PairAddress,
    #[serde(default)]
    pub mintable: Option<bool>,
    #[serde(default)]
    pub freezable: Option<bool>,
    #[serde(default)]
    pub honeypot: Option<bool>,
    #[serde(default)]
    pub contract_verified: Option<bool>,
}

impl PairStatsData {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pair_address.is_empty() {
            return Err(ValidationError::invalid("pair-stats", "empty pairAddress"));
        }
        if self.mintable.is_none()
            && self.freezable.is_none()
            && self.honeypot.is_none()
            && self.contract_verified.is_none()
        {
            return Err(ValidationError::invalid("pair-stats", "no audit fields"));
        }
        Ok(())
    }
}

/// `scanner-pairs`: the complete list of pairs currently valid for one table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerPairsData {
    pub pairs: Vec<PairAddress>,
    pub table_type: TableType,
}

impl ScannerPairsData {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table_type.as_str().is_empty() {
            return Err(ValidationError::invalid("scanner-pairs", "empty tableType"));
        }
        if self.pairs.iter().any(PairAddress::is_empty) {
            return Err(ValidationError::invalid("scanner-pairs", "empty pair in list"));
        }
        Ok(())
    }
}
