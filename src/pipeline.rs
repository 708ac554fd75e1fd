//! `FeedPipeline`: the connection manager, subscription manager and update
//! aggregator wired together behind one start/stop lifecycle.
//!
//! Nothing here is process-wide: several pipelines (e.g. one per chain) can
//! run side by side and be torn down independently.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::Stream;
use tokio::task::JoinHandle;

use crate::aggregator::{self, AggregatorHandle, BatchSink};
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::shared::{PairAddress, TableType};
use crate::subscriptions::{self, SubscriptionHandle, SubscriptionRecord, SubscriptionStats};
use crate::ws::native::WsClient;
use crate::ws::{CallbackId, ConnectionState, ScannerFilterParams, WsEvent};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Services {
    subscriptions: SubscriptionHandle,
    aggregator: AggregatorHandle,
    callback: CallbackId,
    tasks: Vec<JoinHandle<()>>,
}

/// A running live-data pipeline.
///
/// ```rust,ignore
/// let store = Arc::new(Mutex::new(TableStore::new()));
/// let mut pipeline = FeedPipeline::start(FeedConfig::default(), Arc::clone(&store)).await?;
///
/// pipeline.update_visible_tokens(visible_pairs).await?;
/// // ... the store receives batched updates ...
/// pipeline.stop().await?;
/// ```
pub struct FeedPipeline {
    ws: Arc<WsClient>,
    services: Option<Services>,
}

impl FeedPipeline {
    /// Validate `config`, start the actors and connect.
    ///
    /// Fails if the config is invalid or the first connection attempt fails;
    /// in both cases nothing is left running.
    pub async fn start<S>(config: FeedConfig, sink: S) -> Result<Self, FeedError>
    where
        S: BatchSink + Send + 'static,
    {
        config.validate()?;

        let ws = Arc::new(WsClient::new(config.ws.clone()));
        let (aggregator, aggregator_task) = aggregator::spawn(config.aggregator.clone(), sink);
        let (subscriptions, subscription_task) =
            subscriptions::spawn(config.subscriptions.clone(), Arc::clone(&ws));

        // Registered before connecting so no inbound frame is missed.
        let callback = {
            let aggregator = aggregator.clone();
            let subscriptions = subscriptions.clone();
            ws.on_message(move |msg| {
                if let Some(pair) = msg.pair() {
                    subscriptions.confirm(pair.clone());
                }
                aggregator.push(msg.clone());
            })
        };

        if let Err(e) = ws.connect().await {
            tracing::error!("Feed pipeline failed to start: {}", e);
            ws.remove_message_callback(callback);
            ws.disconnect().await?;
            aggregator_task.abort();
            subscription_task.abort();
            return Err(e.into());
        }

        tracing::info!("Feed pipeline started");
        Ok(Self {
            ws,
            services: Some(Services {
                subscriptions,
                aggregator,
                callback,
                tasks: vec![subscription_task, aggregator_task],
            }),
        })
    }

    fn services(&self) -> Result<&Services, FeedError> {
        self.services
            .as_ref()
            .ok_or(FeedError::ServiceStopped("Feed pipeline"))
    }

    // ─── Collaborator API ────────────────────────────────────────────────

    /// Replace the set of pairs the app currently shows.
    pub async fn update_visible_tokens(&self, pairs: Vec<PairAddress>) -> Result<(), FeedError> {
        self.services()?.subscriptions.update_visible_tokens(pairs).await
    }

    pub async fn subscription_status(&self, pair: PairAddress) -> Result<Option<SubscriptionRecord>, FeedError> {
        self.services()?.subscriptions.subscription_status(pair).await
    }

    pub async fn subscription_stats(&self) -> Result<SubscriptionStats, FeedError> {
        self.services()?.subscriptions.stats().await
    }

    pub async fn retry_failed_subscriptions(&self) -> Result<(), FeedError> {
        self.services()?.subscriptions.retry_failed_subscriptions().await
    }

    pub async fn clear_all_subscriptions(&self) -> Result<(), FeedError> {
        self.services()?.subscriptions.clear_all_subscriptions().await
    }

    /// Subscribe `table` to a scanner filter, replacing its previous one.
    pub async fn set_scanner_filter(&self, table: TableType, filter: ScannerFilterParams) -> Result<(), FeedError> {
        self.services()?.subscriptions.set_scanner_filter(table, filter).await
    }

    /// Flush buffered updates now.
    pub async fn flush(&self) -> Result<(), FeedError> {
        self.services()?.aggregator.flush().await
    }

    pub async fn clear_pending_updates(&self) -> Result<(), FeedError> {
        self.services()?.aggregator.clear_pending_updates().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.ws.connection_state()
    }

    pub fn is_running(&self) -> bool {
        self.services.is_some()
    }

    /// Connection events (connected, disconnected, messages, errors).
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = WsEvent> + Send + '_>> {
        self.ws.events()
    }

    pub fn ws(&self) -> &WsClient {
        &self.ws
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Unsubscribe everything, drop buffered updates and disconnect.
    ///
    /// No batch reaches the sink after this returns. Calling it again is a
    /// no-op.
    pub async fn stop(&mut self) -> Result<(), FeedError> {
        let Some(services) = self.services.take() else {
            return Ok(());
        };
        let Services {
            subscriptions,
            aggregator,
            callback,
            tasks,
        } = services;

        if let Err(e) = subscriptions.clear_all_subscriptions().await {
            tracing::warn!("Clearing subscriptions on stop failed: {}", e);
        }
        self.ws.remove_message_callback(callback);
        if let Err(e) = aggregator.clear_pending_updates().await {
            tracing::warn!("Clearing pending updates on stop failed: {}", e);
        }
        self.ws.disconnect().await?;

        // Actors exit once their last handle is gone.
        drop(subscriptions);
        drop(aggregator);
        for mut task in tasks {
            if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                tracing::warn!("Pipeline task did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::info!("Feed pipeline stopped");
        Ok(())
    }
}

impl Drop for FeedPipeline {
    fn drop(&mut self) {
        if let Some(services) = self.services.take() {
            self.ws.remove_message_callback(services.callback);
            for task in services.tasks {
                task.abort();
            }
        }
    }
}
