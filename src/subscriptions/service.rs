//! Subscription actor: one task owns the [`SubscriptionManager`]; handles talk
//! to it over a command channel.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{MessageSink, SubscriptionConfig, SubscriptionManager, SubscriptionRecord, SubscriptionStats};
use crate::error::FeedError;
use crate::shared::{PairAddress, TableType};
use crate::ws::ScannerFilterParams;

const SERVICE: &str = "Subscription manager";

enum Command {
    UpdateVisible(Vec<PairAddress>),
    Subscribe(PairAddress),
    Unsubscribe(PairAddress),
    Confirm(PairAddress),
    SetScannerFilter(TableType, ScannerFilterParams),
    RetryFailed,
    ClearAll(oneshot::Sender<()>),
    Status(PairAddress, oneshot::Sender<Option<SubscriptionRecord>>),
    Stats(oneshot::Sender<SubscriptionStats>),
}

/// Cloneable handle to a running subscription actor.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    tx: mpsc::Sender<Command>,
}

/// Spawn a subscription actor sending through `sink`.
///
/// The task ends once every handle is dropped; pending timers die with it.
pub fn spawn<S>(config: SubscriptionConfig, sink: S) -> (SubscriptionHandle, JoinHandle<()>)
where
    S: MessageSink + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1024);
    let manager = SubscriptionManager::new(config, sink);
    let handle = tokio::spawn(run(manager, rx));
    (SubscriptionHandle { tx }, handle)
}

async fn run<S: MessageSink>(mut manager: SubscriptionManager<S>, mut rx: mpsc::Receiver<Command>) {
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(cmd) => handle(&mut manager, cmd),
                None => break,
            },
            () = manager.tick() => {}
        }
    }
    tracing::debug!("Subscription actor stopped");
}

fn handle<S: MessageSink>(manager: &mut SubscriptionManager<S>, cmd: Command) {
    match cmd {
        Command::UpdateVisible(pairs) => manager.update_visible_tokens(pairs),
        Command::Subscribe(pair) => manager.subscribe_to_pair(pair),
        Command::Unsubscribe(pair) => manager.unsubscribe_from_pair(&pair),
        Command::Confirm(pair) => manager.confirm(&pair),
        Command::SetScannerFilter(table, filter) => manager.set_scanner_filter(table, filter),
        Command::RetryFailed => manager.retry_failed_subscriptions(),
        Command::ClearAll(done) => {
            manager.clear_all_subscriptions();
            let _ = done.send(());
        }
        Command::Status(pair, reply) => {
            let _ = reply.send(manager.subscription_status(&pair).cloned());
        }
        Command::Stats(reply) => {
            let _ = reply.send(manager.stats());
        }
    }
}

impl SubscriptionHandle {
    async fn send(&self, cmd: Command) -> Result<(), FeedError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| FeedError::ServiceStopped(SERVICE))
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, FeedError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| FeedError::ServiceStopped(SERVICE))
    }

    pub async fn update_visible_tokens(&self, pairs: Vec<PairAddress>) -> Result<(), FeedError> {
        self.send(Command::UpdateVisible(pairs)).await
    }

    pub async fn subscribe_to_pair(&self, pair: PairAddress) -> Result<(), FeedError> {
        self.send(Command::Subscribe(pair)).await
    }

    pub async fn unsubscribe_from_pair(&self, pair: PairAddress) -> Result<(), FeedError> {
        self.send(Command::Unsubscribe(pair)).await
    }

    /// Report inbound data for `pair`. Usable from sync callbacks; dropped
    /// with a warning when the actor is saturated.
    pub fn confirm(&self, pair: PairAddress) {
        if let Err(e) = self.tx.try_send(Command::Confirm(pair)) {
            if let mpsc::error::TrySendError::Full(Command::Confirm(pair)) = e {
                tracing::warn!("Subscription actor busy, confirmation for {} dropped", pair);
            }
        }
    }

    pub async fn set_scanner_filter(&self, table: TableType, filter: ScannerFilterParams) -> Result<(), FeedError> {
        self.send(Command::SetScannerFilter(table, filter)).await
    }

    pub async fn retry_failed_subscriptions(&self) -> Result<(), FeedError> {
        self.send(Command::RetryFailed).await
    }

    /// Unsubscribe everything; resolves once the actor has cleared its state.
    pub async fn clear_all_subscriptions(&self) -> Result<(), FeedError> {
        self.ask(Command::ClearAll).await
    }

    pub async fn subscription_status(&self, pair: PairAddress) -> Result<Option<SubscriptionRecord>, FeedError> {
        self.ask(|reply| Command::Status(pair, reply)).await
    }

    pub async fn stats(&self) -> Result<SubscriptionStats, FeedError> {
        self.ask(Command::Stats).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WsError;
    use crate::subscriptions::SubscriptionStatus;
    use crate::ws::MessageOut;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<MessageOut>>>);

    impl MessageSink for RecordingSink {
        fn send(&self, msg: MessageOut) -> Result<(), WsError> {
            self.0.lock().unwrap().push(msg);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_actor_processes_visible_set_and_confirmation() {
        let sink = RecordingSink::default();
        let config = SubscriptionConfig {
            confirm_on_send: false,
            ..Default::default()
        };
        let (handle, task) = spawn(config, sink.clone());
        let pair = PairAddress::from("A");

        handle.update_visible_tokens(vec![pair.clone()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let record = handle.subscription_status(pair.clone()).await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Pending);
        assert_eq!(sink.0.lock().unwrap().len(), 1);

        handle.confirm(pair.clone());
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.subscribed, 1);
        assert_eq!(stats.total, 1);

        handle.clear_all_subscriptions().await.unwrap();
        assert_eq!(handle.stats().await.unwrap().total, 0);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_stopped_actor() {
        let (handle, task) = spawn(SubscriptionConfig::default(), RecordingSink::default());
        task.abort();
        let _ = task.await;

        let result = handle.stats().await;
        assert!(matches!(result, Err(FeedError::ServiceStopped(_))));
    }
}
