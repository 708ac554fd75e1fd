//! Pair domain: batched update records and the table state container.

pub mod state;
pub mod wire;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::shared::PairAddress;

pub use state::{PairRow, TableStore};
pub use wire::{PairStatsData, ScannerPairsData, TickData};

/// A buffered price change for one pair in one table.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub pair: PairAddress,
    pub price: Decimal,
    /// Market cap projected onto `price`; `None` when the row never had one.
    pub market_cap: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// Partial audit field set. `None` fields are left as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditPatch {
    pub mintable: Option<bool>,
    pub freezable: Option<bool>,
    pub honeypot: Option<bool>,
    pub contract_verified: Option<bool>,
}

impl From<&PairStatsData> for AuditPatch {
    fn from(stats: &PairStatsData) -> Self {
        Self {
            mintable: stats.mintable,
            freezable: stats.freezable,
            honeypot: stats.honeypot,
            contract_verified: stats.contract_verified,
        }
    }
}

/// A buffered audit change for one pair in one table.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditUpdate {
    pub pair: PairAddress,
    pub patch: AuditPatch,
    pub timestamp: DateTime<Utc>,
}

/// Everything flushed to one table in one go, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableBatch {
    pub price_updates: Vec<PriceUpdate>,
    pub audit_updates: Vec<AuditUpdate>,
}

impl TableBatch {
    pub fn len(&self) -> usize {
        self.price_updates.len() + self.audit_updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.price_updates.is_empty() && self.audit_updates.is_empty()
    }
}

/// Project a market cap onto a new price, holding the cap/price ratio.
///
/// Falls back to the existing cap when there is no usable previous price
/// (missing or zero) or no previous cap at all.
pub fn project_market_cap(
    existing_price: Option<Decimal>,
    existing_market_cap: Option<Decimal>,
    new_price: Decimal,
) -> Option<Decimal> {
    match (existing_price, existing_market_cap) {
        (Some(price), Some(cap)) if !price.is_zero() => cap
            .checked_div(price)
            .and_then(|ratio| ratio.checked_mul(new_price))
            .or(Some(cap)),
        (_, cap) => cap,
    }
}
