//! Aggregator actor: one task owns the [`UpdateAggregator`] and its buffers.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{AggregatorConfig, BatchSink, UpdateAggregator};
use crate::error::FeedError;
use crate::ws::Kind;

const SERVICE: &str = "Update aggregator";

enum Command {
    Message(Kind),
    Flush(oneshot::Sender<()>),
    ClearPending(oneshot::Sender<()>),
    PendingCount(oneshot::Sender<usize>),
}

/// Cloneable handle to a running aggregator actor.
#[derive(Debug, Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Command>,
}

/// Spawn an aggregator actor applying batches to `sink`.
pub fn spawn<S>(config: AggregatorConfig, sink: S) -> (AggregatorHandle, JoinHandle<()>)
where
    S: BatchSink + Send + 'static,
{
    let (tx, rx) = mpsc::channel(4096);
    let aggregator = UpdateAggregator::new(config, sink);
    let handle = tokio::spawn(run(aggregator, rx));
    (AggregatorHandle { tx }, handle)
}

async fn run<S: BatchSink>(mut aggregator: UpdateAggregator<S>, mut rx: mpsc::Receiver<Command>) {
    loop {
        tokio::select! {
            // Drain inbound messages before letting a flush fire.
            biased;
            cmd = rx.recv() => match cmd {
                Some(Command::Message(msg)) => aggregator.handle_message(msg),
                Some(Command::Flush(done)) => {
                    aggregator.flush();
                    let _ = done.send(());
                }
                Some(Command::ClearPending(done)) => {
                    aggregator.clear_pending_updates();
                    let _ = done.send(());
                }
                Some(Command::PendingCount(reply)) => {
                    let _ = reply.send(aggregator.pending_count());
                }
                None => break,
            },
            () = aggregator.tick() => {}
        }
    }
    tracing::debug!("Aggregator actor stopped");
}

impl AggregatorHandle {
    /// Queue an inbound message. Usable from sync callbacks. When the actor is
    /// saturated, ticks and pair stats are dropped with a warning; a
    /// scanner-pairs replacement waits for room on a spawned task instead.
    pub fn push(&self, msg: Kind) {
        match self.tx.try_send(Command::Message(msg)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Command::Message(Kind::ScannerPairs(data)))) => {
                tracing::warn!(
                    "Aggregator queue full, deferring scanner-pairs for {}",
                    data.table_type
                );
                self.defer(Command::Message(Kind::ScannerPairs(data)));
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Aggregator queue full, dropping inbound message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Aggregator stopped, dropping inbound message");
            }
        }
    }

    fn defer(&self, cmd: Command) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("No runtime to defer inbound message on, dropping it");
            return;
        };
        let tx = self.tx.clone();
        runtime.spawn(async move {
            if tx.send(cmd).await.is_err() {
                tracing::debug!("Aggregator stopped, dropping deferred message");
            }
        });
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, FeedError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| FeedError::ServiceStopped(SERVICE))?;
        reply_rx.await.map_err(|_| FeedError::ServiceStopped(SERVICE))
    }

    /// Flush now, without waiting for the debounce.
    pub async fn flush(&self) -> Result<(), FeedError> {
        self.ask(Command::Flush).await
    }

    pub async fn clear_pending_updates(&self) -> Result<(), FeedError> {
        self.ask(Command::ClearPending).await
    }

    pub async fn pending_count(&self) -> Result<usize, FeedError> {
        self.ask(Command::PendingCount).await
    }
}
