//! Per-pair subscription state machine, visible-set diffing and chunked delta
//! processing.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::Utc;

use super::{MessageSink, SubscriptionConfig, SubscriptionRecord, SubscriptionStats, SubscriptionStatus};
use crate::shared::{PairAddress, TableType};
use crate::timer::Timers;
use crate::ws::{MessageOut, ScannerFilterParams, SubscribeParams};

const TIMEOUT_REASON: &str = "Subscription timeout";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Timer {
    /// Coalescing window after a visible-set change.
    Debounce,
    /// Pause before the next chunk of queued deltas.
    NextChunk,
    /// Confirmation deadline of a pending pair.
    Timeout(PairAddress),
    /// Backoff before resubscribing a failed pair.
    Retry(PairAddress),
}

/// Owns the subscription records of one pipeline.
///
/// Every method runs to completion without awaiting; the only suspension
/// point is [`tick`](Self::tick), which waits for the next timer.
pub struct SubscriptionManager<S> {
    config: SubscriptionConfig,
    sink: S,
    records: BTreeMap<PairAddress, SubscriptionRecord>,
    visible: BTreeSet<PairAddress>,
    subscribe_queue: VecDeque<PairAddress>,
    unsubscribe_queue: VecDeque<PairAddress>,
    filters: BTreeMap<TableType, ScannerFilterParams>,
    timers: Timers<Timer>,
}

impl<S: MessageSink> SubscriptionManager<S> {
    pub fn new(config: SubscriptionConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            records: BTreeMap::new(),
            visible: BTreeSet::new(),
            subscribe_queue: VecDeque::new(),
            unsubscribe_queue: VecDeque::new(),
            filters: BTreeMap::new(),
            timers: Timers::new(),
        }
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    // ─── Visible set ─────────────────────────────────────────────────────

    /// Replace the visible set and queue the delta for batched processing.
    pub fn update_visible_tokens(&mut self, pairs: Vec<PairAddress>) {
        let mut next = BTreeSet::new();
        let mut to_subscribe = Vec::new();
        for pair in pairs {
            if pair.is_empty() {
                continue;
            }
            if next.insert(pair.clone()) && !self.visible.contains(&pair) {
                to_subscribe.push(pair);
            }
        }
        let to_unsubscribe: Vec<PairAddress> = self.visible.difference(&next).cloned().collect();
        self.visible = next;

        if to_subscribe.is_empty() && to_unsubscribe.is_empty() {
            return;
        }
        tracing::debug!(
            "Visible set changed: +{} -{} ({} visible)",
            to_subscribe.len(),
            to_unsubscribe.len(),
            self.visible.len()
        );

        for pair in to_unsubscribe {
            self.subscribe_queue.retain(|p| p != &pair);
            if !self.unsubscribe_queue.contains(&pair) {
                self.unsubscribe_queue.push_back(pair);
            }
        }
        for pair in to_subscribe {
            self.unsubscribe_queue.retain(|p| p != &pair);
            if !self.subscribe_queue.contains(&pair) {
                self.subscribe_queue.push_back(pair);
            }
        }

        // A running chunk sequence picks up the new entries on its own.
        if !self.timers.is_armed(&Timer::NextChunk) {
            self.timers.arm(Timer::Debounce, self.config.debounce());
        }
    }

    pub fn visible_tokens(&self) -> Vec<PairAddress> {
        self.visible.iter().cloned().collect()
    }

    pub fn queued(&self) -> (usize, usize) {
        (self.subscribe_queue.len(), self.unsubscribe_queue.len())
    }

    /// Process one chunk: unsubscriptions drain before subscriptions.
    fn process_chunk(&mut self) {
        let batch = self.config.batch_size.max(1);

        if !self.unsubscribe_queue.is_empty() {
            let take = batch.min(self.unsubscribe_queue.len());
            let chunk: Vec<PairAddress> = self.unsubscribe_queue.drain(..take).collect();
            for pair in chunk {
                if self.visible.contains(&pair) {
                    tracing::debug!("Skipping stale unsubscribe for visible {}", pair);
                    continue;
                }
                self.unsubscribe_from_pair(&pair);
            }
        } else if !self.subscribe_queue.is_empty() {
            let take = batch.min(self.subscribe_queue.len());
            let chunk: Vec<PairAddress> = self.subscribe_queue.drain(..take).collect();
            for pair in chunk {
                if !self.visible.contains(&pair) {
                    tracing::debug!("Skipping stale subscribe for hidden {}", pair);
                    continue;
                }
                self.subscribe_to_pair(pair);
            }
        }

        if !self.unsubscribe_queue.is_empty() || !self.subscribe_queue.is_empty() {
            self.timers.arm(Timer::NextChunk, self.config.batch_delay());
        }
    }

    // ─── Per-pair operations ─────────────────────────────────────────────

    /// Subscribe to one pair. No-op while pending or subscribed; rejected
    /// once the active-record ceiling is reached.
    pub fn subscribe_to_pair(&mut self, pair: PairAddress) {
        let retry_count = match self.records.get(&pair) {
            Some(record) if record.status.is_active() => {
                tracing::debug!("Already {} for {}", record.status, pair);
                return;
            }
            Some(record) if record.status == SubscriptionStatus::Error => record.retry_count,
            _ => 0,
        };

        let active = self.active_count();
        if active >= self.config.max_concurrent_subscriptions {
            tracing::warn!(
                "Subscription limit reached ({}/{}), rejecting {}",
                active,
                self.config.max_concurrent_subscriptions,
                pair
            );
            return;
        }

        self.timers.cancel(&Timer::Retry(pair.clone()));
        self.records
            .insert(pair.clone(), SubscriptionRecord::pending(pair.clone(), retry_count));

        if let Err(e) = self.send_subscribe(&pair) {
            self.fail(&pair, e.to_string());
            return;
        }

        if self.config.confirm_on_send {
            self.mark_subscribed(&pair);
        } else {
            self.timers
                .arm(Timer::Timeout(pair), self.config.subscription_timeout());
        }
    }

    /// Unsubscribe from one pair. No-op for untracked or unsubscribed pairs.
    pub fn unsubscribe_from_pair(&mut self, pair: &PairAddress) {
        match self.records.get(pair) {
            Some(record) if record.status != SubscriptionStatus::Unsubscribed => {}
            _ => return,
        }

        self.timers.cancel(&Timer::Timeout(pair.clone()));
        self.timers.cancel(&Timer::Retry(pair.clone()));

        let chain = self.config.chain;
        if let Err(e) = self.sink.send(MessageOut::unsubscribe_pair(pair.clone(), chain)) {
            tracing::warn!("Unsubscribe from {} failed: {}", pair, e);
        }
        if self.config.subscribe_pair_stats {
            if let Err(e) = self.sink.send(MessageOut::unsubscribe_pair_stats(pair.clone(), chain)) {
                tracing::warn!("Unsubscribe from stats of {} failed: {}", pair, e);
            }
        }

        if let Some(record) = self.records.get_mut(pair) {
            record.status = SubscriptionStatus::Unsubscribed;
        }
        tracing::debug!("Unsubscribed from {}", pair);
    }

    /// Inbound data for `pair` arrived: a pending subscription is confirmed.
    pub fn confirm(&mut self, pair: &PairAddress) {
        if self
            .records
            .get(pair)
            .is_some_and(|r| r.status == SubscriptionStatus::Pending)
        {
            self.mark_subscribed(pair);
        }
    }

    /// Reset every failed record's retry count and subscribe again.
    pub fn retry_failed_subscriptions(&mut self) {
        let failed: Vec<PairAddress> = self
            .records
            .values()
            .filter(|r| r.status == SubscriptionStatus::Error)
            .map(|r| r.pair.clone())
            .collect();
        if failed.is_empty() {
            return;
        }
        tracing::info!("Retrying {} failed subscription(s)", failed.len());

        for pair in failed {
            if let Some(record) = self.records.get_mut(&pair) {
                record.retry_count = 0;
            }
            self.subscribe_to_pair(pair);
        }
    }

    /// Unsubscribe everything and drop all state, timers included.
    pub fn clear_all_subscriptions(&mut self) {
        let tracked: Vec<PairAddress> = self.records.keys().cloned().collect();
        for pair in &tracked {
            self.unsubscribe_from_pair(pair);
        }
        let filters = std::mem::take(&mut self.filters);
        for (table, filter) in filters {
            self.send_filter(MessageOut::Unsubscribe(SubscribeParams::scanner_filter(table, filter)));
        }

        self.subscribe_queue.clear();
        self.unsubscribe_queue.clear();
        self.visible.clear();
        self.timers.clear();
        self.records.clear();
        tracing::info!("Cleared {} subscription record(s)", tracked.len());
    }

    /// Replace the scanner filter of `table`, unsubscribing the previous one.
    pub fn set_scanner_filter(&mut self, table: TableType, filter: ScannerFilterParams) {
        if self.filters.get(&table) == Some(&filter) {
            return;
        }
        if let Some(previous) = self.filters.remove(&table) {
            self.send_filter(MessageOut::Unsubscribe(SubscribeParams::scanner_filter(
                table.clone(),
                previous,
            )));
        }
        self.send_filter(MessageOut::Subscribe(SubscribeParams::scanner_filter(
            table.clone(),
            filter.clone(),
        )));
        self.filters.insert(table, filter);
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn subscription_status(&self, pair: &PairAddress) -> Option<&SubscriptionRecord> {
        self.records.get(pair)
    }

    pub fn stats(&self) -> SubscriptionStats {
        let mut stats = SubscriptionStats {
            total: self.records.len(),
            ..Default::default()
        };
        for record in self.records.values() {
            match record.status {
                SubscriptionStatus::Pending => stats.pending += 1,
                SubscriptionStatus::Subscribed => stats.subscribed += 1,
                SubscriptionStatus::Error => stats.error += 1,
                SubscriptionStatus::Unsubscribed => stats.unsubscribed += 1,
            }
        }
        stats
    }

    pub fn active_count(&self) -> usize {
        self.records.values().filter(|r| r.status.is_active()).count()
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    // ─── Timers ──────────────────────────────────────────────────────────

    /// Wait for the next timer and handle it. Never resolves while no timer
    /// is armed.
    pub async fn tick(&mut self) {
        let timer = self.timers.expired().await;
        self.on_timer(timer);
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Debounce | Timer::NextChunk => self.process_chunk(),
            Timer::Timeout(pair) => {
                if self
                    .records
                    .get(&pair)
                    .is_some_and(|r| r.status == SubscriptionStatus::Pending)
                {
                    tracing::warn!("Subscription to {} timed out", pair);
                    self.fail(&pair, TIMEOUT_REASON.to_string());
                }
            }
            Timer::Retry(pair) => {
                if self
                    .records
                    .get(&pair)
                    .is_some_and(|r| r.status == SubscriptionStatus::Error)
                {
                    tracing::info!("Retrying subscription to {}", pair);
                    self.subscribe_to_pair(pair);
                }
            }
        }
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    fn send_subscribe(&self, pair: &PairAddress) -> Result<(), crate::error::WsError> {
        let chain = self.config.chain;
        self.sink.send(MessageOut::subscribe_pair(pair.clone(), chain))?;
        if self.config.subscribe_pair_stats {
            self.sink
                .send(MessageOut::subscribe_pair_stats(pair.clone(), chain))?;
        }
        Ok(())
    }

    fn send_filter(&self, msg: MessageOut) {
        let kind = msg.kind();
        let room = msg.params().room().to_string();
        if let Err(e) = self.sink.send(msg) {
            tracing::warn!("'{}' for {} failed: {}", kind, room, e);
        }
    }

    fn mark_subscribed(&mut self, pair: &PairAddress) {
        self.timers.cancel(&Timer::Timeout(pair.clone()));
        if let Some(record) = self.records.get_mut(pair) {
            record.status = SubscriptionStatus::Subscribed;
            record.subscribed_at = Some(Utc::now());
            record.error_message = None;
            tracing::debug!("Subscribed to {}", pair);
        }
    }

    /// Move a record to Error and schedule a retry while retries remain.
    fn fail(&mut self, pair: &PairAddress, reason: String) {
        self.timers.cancel(&Timer::Timeout(pair.clone()));
        let Some(record) = self.records.get_mut(pair) else {
            return;
        };
        record.status = SubscriptionStatus::Error;
        record.error_message = Some(reason);

        if record.retry_count < self.config.max_retries {
            record.retry_count += 1;
            let delay = self.config.retry_delay(record.retry_count);
            tracing::info!(
                "Subscription to {} failed, retry {}/{} in {}ms",
                pair,
                record.retry_count,
                self.config.max_retries,
                delay.as_millis()
            );
            self.timers.arm(Timer::Retry(pair.clone()), delay);
        } else {
            tracing::warn!(
                "Subscription to {} failed after {} retries: {}",
                pair,
                record.retry_count,
                record.error_message.as_deref().unwrap_or_default()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WsError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<MessageOut>>>,
        fail: Arc<AtomicBool>,
    }

    impl MessageSink for RecordingSink {
        fn send(&self, msg: MessageOut) -> Result<(), WsError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(WsError::NotConnected);
            }
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }
    }

    impl RecordingSink {
        fn kinds_for(&self, kind: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.kind() == kind)
                .map(|m| m.params().room().to_string())
                .collect()
        }

        fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    fn pairs(ids: &[&str]) -> Vec<PairAddress> {
        ids.iter().map(|s| PairAddress::from(*s)).collect()
    }

    /// Records stay pending until inbound data confirms them.
    fn explicit_confirm() -> SubscriptionConfig {
        SubscriptionConfig {
            confirm_on_send: false,
            ..Default::default()
        }
    }

    fn manager(config: SubscriptionConfig) -> (SubscriptionManager<RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        (SubscriptionManager::new(config, sink.clone()), sink)
    }

    /// Timer wheels round deadlines up to the next millisecond.
    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(20),
            "elapsed {:?}, expected {:?}",
            elapsed,
            expected
        );
    }

    /// Run timers until the chunk queues are drained.
    async fn drain_queues(manager: &mut SubscriptionManager<RecordingSink>) {
        while manager.queued() != (0, 0) || manager.timers.is_armed(&Timer::Debounce) {
            manager.tick().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_set_transition() {
        let (mut manager, sink) = manager(explicit_confirm());

        manager.update_visible_tokens(pairs(&["A", "B"]));
        drain_queues(&mut manager).await;
        assert_eq!(sink.kinds_for("pair"), vec!["A", "B"]);

        manager.confirm(&PairAddress::from("A"));
        manager.confirm(&PairAddress::from("B"));
        sink.clear();

        manager.update_visible_tokens(pairs(&["B", "C"]));
        drain_queues(&mut manager).await;
        assert_eq!(sink.kinds_for("unsubscribe-pair"), vec!["A"]);
        assert_eq!(sink.kinds_for("pair"), vec!["C"]);

        manager.confirm(&PairAddress::from("C"));
        let subscribed: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|p| manager.subscription_status(&PairAddress::from(*p)).unwrap().status)
            .collect();
        assert_eq!(
            subscribed,
            vec![
                SubscriptionStatus::Unsubscribed,
                SubscriptionStatus::Subscribed,
                SubscriptionStatus::Subscribed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_changes() {
        let (mut manager, sink) = manager(SubscriptionConfig::default());
        let start = Instant::now();

        manager.update_visible_tokens(pairs(&["A"]));
        manager.update_visible_tokens(pairs(&[]));
        manager.update_visible_tokens(pairs(&["B"]));
        drain_queues(&mut manager).await;

        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(sink.kinds_for("pair"), vec!["B"]);
        assert!(sink.kinds_for("unsubscribe-pair").is_empty());
        assert!(manager.subscription_status(&PairAddress::from("A")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_with_delay() {
        let config = SubscriptionConfig {
            batch_size: 2,
            ..Default::default()
        };
        let (mut manager, sink) = manager(config);
        let start = Instant::now();

        manager.update_visible_tokens(pairs(&["A", "B", "C", "D", "E"]));
        manager.tick().await;
        assert_eq!(sink.kinds_for("pair").len(), 2);
        manager.tick().await;
        assert_eq!(sink.kinds_for("pair").len(), 4);
        manager.tick().await;
        assert_eq!(sink.kinds_for("pair").len(), 5);

        // debounce + two inter-chunk pauses
        assert_elapsed(start, Duration::from_millis(350));
        assert_eq!(manager.stats().subscribed, 5);
        assert!(!manager.has_pending_timers());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribes_drain_before_subscribes() {
        let (mut manager, sink) = manager(SubscriptionConfig::default());
        manager.update_visible_tokens(pairs(&["A", "B"]));
        drain_queues(&mut manager).await;
        sink.clear();

        manager.update_visible_tokens(pairs(&["C", "D"]));
        drain_queues(&mut manager).await;

        let kinds: Vec<&'static str> = sink.sent.lock().unwrap().iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["unsubscribe-pair", "unsubscribe-pair", "pair", "pair"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_is_idempotent() {
        let (mut manager, sink) = manager(explicit_confirm());
        manager.subscribe_to_pair(PairAddress::from("X"));
        manager.subscribe_to_pair(PairAddress::from("X"));
        assert_eq!(sink.kinds_for("pair"), vec!["X"]);

        manager.confirm(&PairAddress::from("X"));
        manager.subscribe_to_pair(PairAddress::from("X"));
        assert_eq!(sink.kinds_for("pair").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_pair_stays_subscribed() {
        let (mut manager, sink) = manager(SubscriptionConfig::default());
        let pair = PairAddress::from("X");

        manager.subscribe_to_pair(pair.clone());
        let record = manager.subscription_status(&pair).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Subscribed);
        assert!(record.subscribed_at.is_some());
        assert!(!manager.has_pending_timers());

        // No inbound data for well past the confirmation timeout.
        let idle = tokio::time::timeout(Duration::from_secs(60), manager.tick()).await;
        assert!(idle.is_err());
        assert_eq!(manager.subscription_status(&pair).unwrap().status, SubscriptionStatus::Subscribed);
        assert_eq!(manager.stats().error, 0);
        assert_eq!(sink.kinds_for("pair"), vec!["X"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling() {
        let config = SubscriptionConfig {
            max_concurrent_subscriptions: 3,
            ..Default::default()
        };
        let (mut manager, sink) = manager(config);
        for id in ["a", "b", "c", "d", "e"] {
            manager.subscribe_to_pair(PairAddress::from(id));
        }

        assert_eq!(manager.active_count(), 3);
        assert_eq!(sink.kinds_for("pair").len(), 3);
        assert!(manager.subscription_status(&PairAddress::from("d")).is_none());

        // Freeing a slot admits the next one.
        manager.unsubscribe_from_pair(&PairAddress::from("a"));
        manager.subscribe_to_pair(PairAddress::from("d"));
        assert_eq!(manager.active_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retries_then_stays_error() {
        let config = SubscriptionConfig {
            max_retries: 2,
            ..explicit_confirm()
        };
        let (mut manager, sink) = manager(config);
        let pair = PairAddress::from("X");
        let start = Instant::now();

        manager.subscribe_to_pair(pair.clone());
        manager.tick().await; // timeout
        let record = manager.subscription_status(&pair).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("Subscription timeout"));
        assert_eq!(record.retry_count, 1);
        assert_elapsed(start, Duration::from_secs(10));

        manager.tick().await; // retry after 1s
        assert_eq!(manager.subscription_status(&pair).unwrap().status, SubscriptionStatus::Pending);
        assert_elapsed(start, Duration::from_secs(11));

        manager.tick().await; // timeout
        manager.tick().await; // retry after 2s
        assert_elapsed(start, Duration::from_secs(23));
        manager.tick().await; // final timeout

        let record = manager.subscription_status(&pair).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Error);
        assert_eq!(record.retry_count, 2);
        assert!(!manager.has_pending_timers());
        assert_eq!(sink.kinds_for("pair").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_goes_to_error_and_retries() {
        let (mut manager, sink) = manager(explicit_confirm());
        let pair = PairAddress::from("X");

        sink.fail.store(true, Ordering::SeqCst);
        manager.subscribe_to_pair(pair.clone());
        let record = manager.subscription_status(&pair).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("Not connected"));

        sink.fail.store(false, Ordering::SeqCst);
        manager.tick().await;
        assert_eq!(manager.subscription_status(&pair).unwrap().status, SubscriptionStatus::Pending);
        assert_eq!(manager.subscription_status(&pair).unwrap().retry_count, 1);

        manager.confirm(&pair);
        let record = manager.subscription_status(&pair).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Subscribed);
        assert!(record.subscribed_at.is_some());
        assert!(record.error_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_resets_counts() {
        let config = SubscriptionConfig {
            max_retries: 0,
            ..explicit_confirm()
        };
        let (mut manager, sink) = manager(config);
        let pair = PairAddress::from("X");

        manager.subscribe_to_pair(pair.clone());
        manager.tick().await;
        assert_eq!(manager.stats().error, 1);
        assert!(!manager.has_pending_timers());

        manager.retry_failed_subscriptions();
        assert_eq!(manager.subscription_status(&pair).unwrap().status, SubscriptionStatus::Pending);
        assert_eq!(sink.kinds_for("pair").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_noop_for_untracked() {
        let (mut manager, sink) = manager(SubscriptionConfig::default());
        manager.unsubscribe_from_pair(&PairAddress::from("nope"));
        assert!(sink.sent.lock().unwrap().is_empty());

        manager.subscribe_to_pair(PairAddress::from("X"));
        manager.unsubscribe_from_pair(&PairAddress::from("X"));
        manager.unsubscribe_from_pair(&PairAddress::from("X"));
        assert_eq!(sink.kinds_for("unsubscribe-pair").len(), 1);
        assert_eq!(manager.stats().unsubscribed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_stats_follow_pair() {
        let config = SubscriptionConfig {
            subscribe_pair_stats: true,
            ..Default::default()
        };
        let (mut manager, sink) = manager(config);
        manager.subscribe_to_pair(PairAddress::from("X"));
        manager.unsubscribe_from_pair(&PairAddress::from("X"));

        assert_eq!(sink.kinds_for("pair-stats"), vec!["X"]);
        assert_eq!(sink.kinds_for("unsubscribe-pair-stats"), vec!["X"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanner_filter_replaces_previous() {
        let (mut manager, sink) = manager(SubscriptionConfig::default());
        let table = TableType::from("trending");
        manager.set_scanner_filter(table.clone(), ScannerFilterParams::default());
        manager.set_scanner_filter(table.clone(), ScannerFilterParams::default());
        manager.set_scanner_filter(
            table,
            ScannerFilterParams {
                exclude_honeypots: true,
                ..Default::default()
            },
        );

        let kinds: Vec<&'static str> = sink.sent.lock().unwrap().iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec!["scanner-filter", "unsubscribe-scanner-filter", "scanner-filter"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all() {
        let (mut manager, sink) = manager(SubscriptionConfig::default());
        manager.update_visible_tokens(pairs(&["A", "B"]));
        drain_queues(&mut manager).await;
        manager.set_scanner_filter(TableType::from("t"), ScannerFilterParams::default());
        manager.update_visible_tokens(pairs(&["C"]));
        sink.clear();

        manager.clear_all_subscriptions();

        assert_eq!(sink.kinds_for("unsubscribe-pair"), vec!["A", "B"]);
        assert_eq!(sink.kinds_for("unsubscribe-scanner-filter"), vec!["t"]);
        assert_eq!(manager.stats(), SubscriptionStats::default());
        assert_eq!(manager.queued(), (0, 0));
        assert!(manager.visible_tokens().is_empty());
        assert!(!manager.has_pending_timers());
    }
}
