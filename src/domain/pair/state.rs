//! Table state containers: app-owned, SDK-provided update logic.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{AuditPatch, TableBatch};
use crate::shared::{PairAddress, TableType};

/// One rendered row: the latest known quote and audit flags of a pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairRow {
    pub pair: PairAddress,
    pub price: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub mintable: Option<bool>,
    pub freezable: Option<bool>,
    pub honeypot: Option<bool>,
    pub contract_verified: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PairRow {
    pub fn new(pair: impl Into<PairAddress>) -> Self {
        Self {
            pair: pair.into(),
            ..Default::default()
        }
    }

    pub fn with_quote(mut self, price: Decimal, market_cap: Decimal) -> Self {
        self.price = Some(price);
        self.market_cap = Some(market_cap);
        self
    }

    fn apply_patch(&mut self, patch: &AuditPatch) {
        if let Some(v) = patch.mintable {
            self.mintable = Some(v);
        }
        if let Some(v) = patch.freezable {
            self.freezable = Some(v);
        }
        if let Some(v) = patch.honeypot {
            self.honeypot = Some(v);
        }
        if let Some(v) = patch.contract_verified {
            self.contract_verified = Some(v);
        }
    }
}

/// Rows of every scanner table, keyed by table then pair.
///
/// The app owns instances of this type (usually behind `Arc<Mutex<_>>` so
/// the renderer can read while the pipeline writes). The SDK provides the
/// update methods. Rows are only added by the app (initial REST fetch);
/// live updates touch existing rows or remove them.
#[derive(Debug, Clone, Default)]
pub struct TableStore {
    tables: HashMap<TableType, BTreeMap<PairAddress, PairRow>>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all rows of a table (e.g. from a REST page load).
    pub fn replace_table(&mut self, table: TableType, rows: Vec<PairRow>) {
        let rows = rows.into_iter().map(|row| (row.pair.clone(), row)).collect();
        self.tables.insert(table, rows);
    }

    /// Insert or overwrite a single row.
    pub fn upsert(&mut self, table: TableType, row: PairRow) {
        self.tables
            .entry(table)
            .or_default()
            .insert(row.pair.clone(), row);
    }

    pub fn row(&self, table: &TableType, pair: &PairAddress) -> Option<&PairRow> {
        self.tables.get(table).and_then(|rows| rows.get(pair))
    }

    /// Rows of a table, ordered by pair address.
    pub fn rows<'a>(&'a self, table: &TableType) -> impl Iterator<Item = &'a PairRow> + 'a {
        self.tables.get(table).into_iter().flat_map(|rows| rows.values())
    }

    pub fn pairs(&self, table: &TableType) -> Vec<PairAddress> {
        self.rows(table).map(|row| row.pair.clone()).collect()
    }

    /// Every table currently showing `pair`, with its row there.
    pub fn tables_tracking<'a>(&'a self, pair: &'a PairAddress) -> impl Iterator<Item = (&'a TableType, &'a PairRow)> + 'a {
        self.tables
            .iter()
            .filter_map(move |(table, rows)| rows.get(pair).map(|row| (table, row)))
    }

    /// Apply one flushed batch in arrival order; the last update per field wins.
    pub fn apply_batch(&mut self, table: &TableType, batch: &TableBatch) {
        let Some(rows) = self.tables.get_mut(table) else {
            tracing::debug!("Batch for unknown table '{}' ignored", table);
            return;
        };

        for update in &batch.price_updates {
            if let Some(row) = rows.get_mut(&update.pair) {
                row.price = Some(update.price);
                if update.market_cap.is_some() {
                    row.market_cap = update.market_cap;
                }
                row.updated_at = Some(update.timestamp);
            }
        }

        for update in &batch.audit_updates {
            if let Some(row) = rows.get_mut(&update.pair) {
                row.apply_patch(&update.patch);
                row.updated_at = Some(update.timestamp);
            }
        }
    }

    /// Remove the given pairs from one table. Returns how many were removed.
    pub fn remove_pairs(&mut self, table: &TableType, pairs: &[PairAddress]) -> usize {
        let Some(rows) = self.tables.get_mut(table) else {
            return 0;
        };
        pairs.iter().filter(|pair| rows.remove(*pair).is_some()).count()
    }

    pub fn len(&self, table: &TableType) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
