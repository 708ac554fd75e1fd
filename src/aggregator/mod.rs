//! Update aggregator: turns the inbound tick / audit stream into per-table
//! batches.
//!
//! Updates are buffered per table and flushed either after a quiet period
//! (the debounce timer restarts on every buffered event) or as soon as the
//! total number of queued updates reaches `max_batch_size`. Updates for the
//! same pair are never collapsed; the sink applies them in order.

pub mod service;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::pair::{
    project_market_cap, AuditPatch, AuditUpdate, PairStatsData, PriceUpdate, ScannerPairsData,
    TableBatch, TableStore, TickData,
};
use crate::shared::{lock, PairAddress, TableType};
use crate::timer::Timers;
use crate::ws::Kind;

pub use service::{spawn, AggregatorHandle};

// ─── Sink ────────────────────────────────────────────────────────────────────

/// A table row's quote as the aggregator sees it before projecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedQuote {
    pub table: TableType,
    pub price: Option<Decimal>,
    pub market_cap: Option<Decimal>,
}

/// The app state batches are applied to.
pub trait BatchSink {
    /// Every table currently showing `pair`, with that row's quote.
    fn tracking(&self, pair: &PairAddress) -> Vec<TrackedQuote>;

    /// Pairs currently shown in `table`.
    fn tracked_pairs(&self, table: &TableType) -> Vec<PairAddress>;

    /// Apply one flushed batch, in order.
    fn apply_batch(&mut self, table: &TableType, batch: TableBatch);

    /// Drop rows that left `table`.
    fn remove_pairs(&mut self, table: &TableType, pairs: &[PairAddress]);
}

impl BatchSink for TableStore {
    fn tracking(&self, pair: &PairAddress) -> Vec<TrackedQuote> {
        self.tables_tracking(pair)
            .map(|(table, row)| TrackedQuote {
                table: table.clone(),
                price: row.price,
                market_cap: row.market_cap,
            })
            .collect()
    }

    fn tracked_pairs(&self, table: &TableType) -> Vec<PairAddress> {
        self.pairs(table)
    }

    fn apply_batch(&mut self, table: &TableType, batch: TableBatch) {
        TableStore::apply_batch(self, table, &batch);
    }

    fn remove_pairs(&mut self, table: &TableType, pairs: &[PairAddress]) {
        TableStore::remove_pairs(self, table, pairs);
    }
}

impl<T: BatchSink> BatchSink for Arc<Mutex<T>> {
    fn tracking(&self, pair: &PairAddress) -> Vec<TrackedQuote> {
        lock(self).tracking(pair)
    }

    fn tracked_pairs(&self, table: &TableType) -> Vec<PairAddress> {
        lock(self).tracked_pairs(table)
    }

    fn apply_batch(&mut self, table: &TableType, batch: TableBatch) {
        lock(self).apply_batch(table, batch);
    }

    fn remove_pairs(&mut self, table: &TableType, pairs: &[PairAddress]) {
        lock(self).remove_pairs(table, pairs);
    }
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub debounce_ms: u64,
    /// Queued updates (all tables) that force an immediate flush.
    pub max_batch_size: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            max_batch_size: 50,
        }
    }
}

impl AggregatorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// ─── Aggregator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlushTimer;

pub struct UpdateAggregator<S> {
    config: AggregatorConfig,
    sink: S,
    buffers: BTreeMap<TableType, TableBatch>,
    queued: usize,
    timers: Timers<FlushTimer>,
}

impl<S: BatchSink> UpdateAggregator<S> {
    pub fn new(config: AggregatorConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            buffers: BTreeMap::new(),
            queued: 0,
            timers: Timers::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Updates buffered and not yet flushed, across all tables.
    pub fn pending_count(&self) -> usize {
        self.queued
    }

    pub fn handle_message(&mut self, msg: Kind) {
        match msg {
            Kind::Tick(tick) => self.on_tick(tick),
            Kind::PairStats(stats) => self.on_pair_stats(stats),
            Kind::ScannerPairs(data) => self.on_scanner_pairs(data),
        }
    }

    fn on_tick(&mut self, tick: TickData) {
        if tick.is_outlier {
            tracing::debug!("Discarding outlier tick for {} at {}", tick.pair_address, tick.price_usd);
            return;
        }

        let tracking = self.sink.tracking(&tick.pair_address);
        if tracking.is_empty() {
            return;
        }
        for quote in tracking {
            let update = PriceUpdate {
                pair: tick.pair_address.clone(),
                price: tick.price_usd,
                market_cap: project_market_cap(quote.price, quote.market_cap, tick.price_usd),
                timestamp: tick.timestamp,
            };
            self.buffers.entry(quote.table).or_default().price_updates.push(update);
            self.queued += 1;
        }
        self.after_buffered();
    }

    fn on_pair_stats(&mut self, stats: PairStatsData) {
        let tracking = self.sink.tracking(&stats.pair_address);
        if tracking.is_empty() {
            return;
        }
        let patch = AuditPatch::from(&stats);
        let now = Utc::now();
        for quote in tracking {
            let update = AuditUpdate {
                pair: stats.pair_address.clone(),
                patch,
                timestamp: now,
            };
            self.buffers.entry(quote.table).or_default().audit_updates.push(update);
            self.queued += 1;
        }
        self.after_buffered();
    }

    /// Flush first so no in-flight update is lost, then drop the rows of the
    /// table that are absent from the new list. Additions are left to the
    /// app's own fetch path.
    fn on_scanner_pairs(&mut self, data: ScannerPairsData) {
        self.flush();

        let keep: HashSet<&PairAddress> = data.pairs.iter().collect();
        let absent: Vec<PairAddress> = self
            .sink
            .tracked_pairs(&data.table_type)
            .into_iter()
            .filter(|pair| !keep.contains(pair))
            .collect();
        if absent.is_empty() {
            return;
        }
        tracing::info!("Removing {} pair(s) no longer in '{}'", absent.len(), data.table_type);
        self.sink.remove_pairs(&data.table_type, &absent);
    }

    fn after_buffered(&mut self) {
        if self.queued >= self.config.max_batch_size {
            tracing::debug!("Batch size {} reached, flushing now", self.queued);
            self.flush();
        } else {
            self.timers.arm(FlushTimer, self.config.debounce());
        }
    }

    /// Emit one batch per non-empty table, then clear every buffer.
    pub fn flush(&mut self) {
        self.timers.cancel(&FlushTimer);
        if self.queued == 0 {
            return;
        }
        let buffers = std::mem::take(&mut self.buffers);
        tracing::debug!("Flushing {} update(s) to {} table(s)", self.queued, buffers.len());
        self.queued = 0;

        for (table, batch) in buffers {
            if !batch.is_empty() {
                self.sink.apply_batch(&table, batch);
            }
        }
    }

    /// Cancel the debounce timer and discard everything buffered.
    pub fn clear_pending_updates(&mut self) {
        self.timers.clear();
        if self.queued > 0 {
            tracing::debug!("Discarding {} pending update(s)", self.queued);
        }
        self.buffers.clear();
        self.queued = 0;
    }

    /// Wait for the debounce timer and flush. Never resolves while idle.
    pub async fn tick(&mut self) {
        let FlushTimer = self.timers.expired().await;
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pair::PairRow;
    use chrono::DateTime;
    use tokio::time::Instant;

    /// A table store that also keeps every batch it was handed.
    #[derive(Default)]
    struct RecordingStore {
        store: TableStore,
        batches: Vec<(TableType, TableBatch)>,
        removed: Vec<(TableType, Vec<PairAddress>)>,
    }

    impl BatchSink for RecordingStore {
        fn tracking(&self, pair: &PairAddress) -> Vec<TrackedQuote> {
            self.store.tracking(pair)
        }

        fn tracked_pairs(&self, table: &TableType) -> Vec<PairAddress> {
            self.store.pairs(table)
        }

        fn apply_batch(&mut self, table: &TableType, batch: TableBatch) {
            self.store.apply_batch(table, &batch);
            self.batches.push((table.clone(), batch));
        }

        fn remove_pairs(&mut self, table: &TableType, pairs: &[PairAddress]) {
            self.store.remove_pairs(table, pairs);
            self.removed.push((table.clone(), pairs.to_vec()));
        }
    }

    fn trending() -> TableType {
        TableType::from("trending")
    }

    fn tick(pair: &str, price: i64, outlier: bool) -> Kind {
        Kind::Tick(TickData {
            pair_address: PairAddress::from(pair),
            price_usd: Decimal::from(price),
            is_outlier: outlier,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        })
    }

    fn aggregator(rows: Vec<PairRow>) -> UpdateAggregator<RecordingStore> {
        let mut store = RecordingStore::default();
        store.store.replace_table(trending(), rows);
        UpdateAggregator::new(AggregatorConfig::default(), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_in_one_window_flush_once_in_order() {
        let mut agg = aggregator(vec![PairRow::new("X").with_quote(Decimal::from(10), Decimal::from(1000))]);
        let start = Instant::now();

        agg.handle_message(tick("X", 10, false));
        agg.handle_message(tick("X", 11, false));
        agg.handle_message(tick("X", 12, false));
        assert_eq!(agg.pending_count(), 3);
        assert!(agg.sink().batches.is_empty());

        agg.tick().await;
        assert!(start.elapsed() >= Duration::from_millis(100));

        let batches = &agg.sink().batches;
        assert_eq!(batches.len(), 1);
        let prices: Vec<Decimal> = batches[0].1.price_updates.iter().map(|u| u.price).collect();
        assert_eq!(prices, vec![Decimal::from(10), Decimal::from(11), Decimal::from(12)]);

        let row = agg.sink().store.row(&trending(), &PairAddress::from("X")).unwrap();
        assert_eq!(row.price, Some(Decimal::from(12)));
        assert_eq!(row.market_cap, Some(Decimal::from(1200)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outlier_never_buffered() {
        let mut agg = aggregator(vec![PairRow::new("X").with_quote(Decimal::from(10), Decimal::from(1000))]);

        agg.handle_message(tick("X", 9999, true));
        assert_eq!(agg.pending_count(), 0);
        assert!(!agg.timers.is_armed(&FlushTimer));

        agg.handle_message(tick("X", 11, false));
        agg.tick().await;
        let prices: Vec<Decimal> = agg.sink().batches[0].1.price_updates.iter().map(|u| u.price).collect();
        assert_eq!(prices, vec![Decimal::from(11)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_batch_size_flushes_immediately() {
        let mut agg = aggregator(vec![PairRow::new("X").with_quote(Decimal::ONE, Decimal::ONE)]);

        for price in 1..=49 {
            agg.handle_message(tick("X", price, false));
        }
        assert!(agg.sink().batches.is_empty());

        agg.handle_message(tick("X", 50, false));
        assert_eq!(agg.sink().batches.len(), 1);
        assert_eq!(agg.sink().batches[0].1.price_updates.len(), 50);
        assert_eq!(agg.pending_count(), 0);
        assert!(!agg.timers.is_armed(&FlushTimer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_fan_out_to_every_tracking_table() {
        let mut agg = aggregator(vec![PairRow::new("X").with_quote(Decimal::from(2), Decimal::from(20))]);
        let mut other = PairRow::new("X");
        other.price = Some(Decimal::from(4));
        agg.sink.store.replace_table(TableType::from("new"), vec![other]);

        agg.handle_message(tick("X", 3, false));
        agg.handle_message(Kind::PairStats(PairStatsData {
            pair_address: PairAddress::from("X"),
            mintable: None,
            freezable: None,
            honeypot: Some(true),
            contract_verified: None,
        }));
        agg.flush();

        let batches = &agg.sink().batches;
        assert_eq!(batches.len(), 2);
        let new = batches.iter().find(|(t, _)| t.as_str() == "new").unwrap();
        // No market cap on that row: nothing to project.
        assert_eq!(new.1.price_updates[0].market_cap, None);
        assert_eq!(new.1.audit_updates.len(), 1);

        let trend = batches.iter().find(|(t, _)| t == &trending()).unwrap();
        assert_eq!(trend.1.price_updates[0].market_cap, Some(Decimal::from(30)));
        assert_eq!(
            agg.sink().store.row(&trending(), &PairAddress::from("X")).unwrap().honeypot,
            Some(true)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_untracked_pairs_are_ignored() {
        let mut agg = aggregator(vec![]);
        agg.handle_message(tick("ghost", 1, false));
        assert_eq!(agg.pending_count(), 0);
        assert!(!agg.timers.is_armed(&FlushTimer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanner_pairs_flushes_then_removes_absent() {
        let mut agg = aggregator(vec![
            PairRow::new("A").with_quote(Decimal::ONE, Decimal::TEN),
            PairRow::new("B"),
            PairRow::new("C"),
        ]);
        agg.handle_message(tick("A", 2, false));

        agg.handle_message(Kind::ScannerPairs(ScannerPairsData {
            pairs: vec![PairAddress::from("B"), PairAddress::from("Z")],
            table_type: trending(),
        }));

        let sink = agg.sink();
        assert_eq!(sink.batches.len(), 1, "pending tick flushed first");
        assert_eq!(
            sink.removed,
            vec![(trending(), vec![PairAddress::from("A"), PairAddress::from("C")])]
        );
        assert_eq!(sink.store.pairs(&trending()), vec![PairAddress::from("B")]);
        assert_eq!(agg.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_pending_updates_discards() {
        let mut agg = aggregator(vec![PairRow::new("X").with_quote(Decimal::ONE, Decimal::ONE)]);
        agg.handle_message(tick("X", 5, false));

        agg.clear_pending_updates();
        assert_eq!(agg.pending_count(), 0);

        let waited = tokio::time::timeout(Duration::from_secs(1), agg.tick()).await;
        assert!(waited.is_err());
        assert!(agg.sink().batches.is_empty());
    }

    #[test]
    fn test_shared_store_sink() {
        let shared = Arc::new(Mutex::new(TableStore::new()));
        shared
            .lock()
            .unwrap()
            .replace_table(trending(), vec![PairRow::new("X").with_quote(Decimal::ONE, Decimal::TEN)]);

        let mut sink = Arc::clone(&shared);
        let quotes = sink.tracking(&PairAddress::from("X"));
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].market_cap, Some(Decimal::TEN));

        sink.remove_pairs(&trending(), &[PairAddress::from("X")]);
        assert_eq!(shared.lock().unwrap().len(&trending()), 0);
    }
}
