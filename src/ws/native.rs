//! Native WebSocket client: `tokio-tungstenite`.
//!
//! Full implementation with:
//! - Background tokio task for connection management
//! - Protocol-level ping/pong health check
//! - Exponential backoff reconnection, optional jitter
//! - Desired-subscription tracking + replay on reconnect
//! - Outgoing size limit and sliding-window rate limit
//! - Bounded callback registry plus stream-based event delivery

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream, Stream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::WsError;
use crate::shared::lock;
use crate::ws::callbacks::{self, CallbackId, CallbackRegistry};
use crate::ws::{
    decode_frame, validate_endpoint, ConnectionState, DesiredSubscriptions, Kind, MessageOut,
    RateLimiter, SubscribeParams, WsConfig, WsEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Commands from public API to background task ─────────────────────────────

enum Command {
    /// An already validated, serialized frame.
    Send(String),
    Disconnect,
}

// ─── Disconnect reasons for reconnection decision ────────────────────────────

enum DisconnectReason {
    UserRequested,
    Lost(String),
}

// ─── State shared between the handle and the task ────────────────────────────

struct Shared {
    state: AtomicU8,
    limiter: Mutex<RateLimiter>,
    callbacks: Mutex<CallbackRegistry>,
    desired: Mutex<DesiredSubscriptions>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    /// Fan a message out to every registered callback, without holding the lock.
    fn dispatch(&self, msg: &Kind) {
        let snapshot = lock(&self.callbacks).snapshot();
        callbacks::deliver(&snapshot, msg);
    }
}

// ─── Background task state ───────────────────────────────────────────────────

struct TaskState {
    config: WsConfig,
    url: Url,
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<WsEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    reconnect_attempts: u32,
    first_connect: Option<oneshot::Sender<Result<(), WsError>>>,
}

impl TaskState {
    fn emit(&self, event: WsEvent) {
        let _ = self.event_tx.try_send(event);
    }

    fn should_reconnect(&self) -> bool {
        self.reconnect_attempts < self.config.max_reconnect_attempts
    }

    fn report_first_connect(&mut self, result: Result<(), WsError>) {
        if let Some(tx) = self.first_connect.take() {
            let _ = tx.send(result);
        }
    }
}

// ─── Public WsClient ─────────────────────────────────────────────────────────

/// Native WebSocket client using `tokio-tungstenite`.
///
/// Uses a background tokio task for connection management.
/// The public API communicates with it via mpsc channels; every method
/// takes `&self` so the client can be shared behind an `Arc`.
pub struct WsClient {
    config: WsConfig,
    shared: Arc<Shared>,
    cmd_tx: Mutex<Option<mpsc::Sender<Command>>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<WsEvent>>,
    event_tx: mpsc::Sender<WsEvent>,
}

impl WsClient {
    /// Create a new WS client. Does not connect yet.
    pub fn new(config: WsConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let shared = Shared {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            limiter: Mutex::new(RateLimiter::new(
                config.rate_limit_max_messages,
                config.rate_limit_window(),
            )),
            callbacks: Mutex::new(CallbackRegistry::new(config.max_callbacks)),
            desired: Mutex::new(DesiredSubscriptions::new()),
        };
        Self {
            config,
            shared: Arc::new(shared),
            cmd_tx: Mutex::new(None),
            task_handle: Mutex::new(None),
            event_rx: tokio::sync::Mutex::new(event_rx),
            event_tx,
        }
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Connect to the WebSocket server.
    ///
    /// Validates the endpoint, spawns the background task and waits for the
    /// first handshake. A failed first handshake is returned as
    /// `WsError::ConnectionFailed`; the task keeps retrying on its backoff
    /// schedule. No-op while a task is already running.
    pub async fn connect(&self) -> Result<(), WsError> {
        let url = validate_endpoint(&self.config.url, self.config.hardened)?;

        let first_rx = {
            let mut cmd_slot = lock(&self.cmd_tx);
            let mut handle_slot = lock(&self.task_handle);
            let running = handle_slot.as_ref().is_some_and(|h| !h.is_finished());
            if cmd_slot.is_some() && running {
                return Ok(());
            }

            let (cmd_tx, cmd_rx) = mpsc::channel(256);
            let (first_tx, first_rx) = oneshot::channel();
            self.shared.set_state(ConnectionState::Connecting);

            let state = TaskState {
                config: self.config.clone(),
                url,
                shared: Arc::clone(&self.shared),
                event_tx: self.event_tx.clone(),
                cmd_rx,
                reconnect_attempts: 0,
                first_connect: Some(first_tx),
            };

            *cmd_slot = Some(cmd_tx);
            *handle_slot = Some(tokio::spawn(run_task(state)));
            first_rx
        };

        match first_rx.await {
            Ok(result) => result,
            Err(_) => Err(WsError::ConnectionFailed("Connection task ended".into())),
        }
    }

    /// Disconnect from the WebSocket server.
    ///
    /// Cancels any pending reconnect, sends a normal close frame and waits
    /// (bounded) for the background task to finish.
    pub async fn disconnect(&self) -> Result<(), WsError> {
        let cmd_tx = lock(&self.cmd_tx).take();
        if let Some(tx) = cmd_tx {
            let _ = tx.send(Command::Disconnect).await;
        }

        let handle = lock(&self.task_handle).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("WebSocket task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// Send a message to the server.
    ///
    /// The message is shape- and size-checked, then counted against the
    /// rate limit; over-limit messages are dropped. Admitted subscribes add to
    /// the desired set; unsubscribes remove from it whether or not the frame
    /// is admitted. While the socket is down the desired
    /// set is all that changes; it is replayed on reconnect.
    pub fn send(&self, msg: MessageOut) -> Result<(), WsError> {
        let cmd_tx = lock(&self.cmd_tx).clone();
        let Some(tx) = cmd_tx else {
            return Err(WsError::NotConnected);
        };
        if self.connection_state() == ConnectionState::Error {
            return Err(WsError::NotConnected);
        }

        let json = msg.encode(self.config.max_outgoing_message_bytes).map_err(|e| {
            tracing::warn!("Dropping invalid outgoing '{}' message: {}", msg.kind(), e);
            e
        })?;

        // Unsubscribes leave the desired set even when the frame is dropped.
        if matches!(msg, MessageOut::Unsubscribe(_)) {
            track_subscription(&mut lock(&self.shared.desired), &msg);
        }

        {
            let mut limiter = lock(&self.shared.limiter);
            if !limiter.try_acquire(Instant::now()) {
                tracing::warn!(
                    "Outgoing rate limit reached, dropping '{}' for {}",
                    msg.kind(),
                    msg.params().room()
                );
                return Err(WsError::RateLimited {
                    limit: limiter.max_messages(),
                    window_ms: self.config.rate_limit_window_ms,
                });
            }
        }

        if matches!(msg, MessageOut::Subscribe(_)) {
            track_subscription(&mut lock(&self.shared.desired), &msg);
        }

        if self.connection_state() != ConnectionState::Connected {
            tracing::debug!("Socket down, '{}' will apply on reconnect", msg.kind());
            return Ok(());
        }

        tx.try_send(Command::Send(json)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WsError::SendFailed("Command channel full".into()),
            mpsc::error::TrySendError::Closed(_) => WsError::NotConnected,
        })
    }

    /// Subscribe to a room.
    pub fn subscribe(&self, params: SubscribeParams) -> Result<(), WsError> {
        self.send(MessageOut::Subscribe(params))
    }

    /// Unsubscribe from a room.
    pub fn unsubscribe(&self, params: SubscribeParams) -> Result<(), WsError> {
        self.send(MessageOut::Unsubscribe(params))
    }

    /// Register a callback for every validated inbound message.
    ///
    /// Past the callback cap the oldest registration is dropped.
    pub fn on_message<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Kind) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).register(Arc::new(callback))
    }

    /// Unregister a callback. Returns whether it was registered.
    pub fn remove_message_callback(&self, id: CallbackId) -> bool {
        lock(&self.shared.callbacks).remove(id)
    }

    pub fn callback_count(&self) -> usize {
        lock(&self.shared.callbacks).len()
    }

    /// Whether the WebSocket is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Canonical keys of the subscriptions replayed on reconnect.
    pub fn desired_subscriptions(&self) -> Vec<String> {
        lock(&self.shared.desired).keys()
    }

    /// Get a stream of events from the WebSocket connection.
    ///
    /// The returned stream borrows `self`; only one consumer at a time
    /// receives events.
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = WsEvent> + Send + '_>> {
        Box::pin(futures_util::stream::unfold(
            &self.event_rx,
            |rx| async move {
                let mut guard = rx.lock().await;
                guard.recv().await.map(|event| (event, rx))
            },
        ))
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        let slot = self.task_handle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn run_task(mut state: TaskState) {
    loop {
        // ── 1. Attempt connection ────────────────────────────────────────
        let (sink, stream) = match attempt_connect(&state.url).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!("WebSocket connection failed: {}", e);
                state.emit(WsEvent::Error(format!("Connection failed: {}", e)));
                state.report_first_connect(Err(e));

                if state.should_reconnect() {
                    state.shared.set_state(ConnectionState::Connecting);
                    if backoff_sleep(&mut state).await {
                        continue;
                    }
                    state.shared.set_state(ConnectionState::Disconnected);
                    return;
                }
                give_up(&state);
                return;
            }
        };

        // ── 2. Connected ─────────────────────────────────────────────────
        state.reconnect_attempts = 0;
        state.shared.set_state(ConnectionState::Connected);
        tracing::info!("WebSocket connected to {}", state.url);
        state.emit(WsEvent::Connected);
        state.report_first_connect(Ok(()));

        // ── 3. Replay desired subscriptions ──────────────────────────────
        let mut sink = sink;
        let desired = lock(&state.shared.desired).snapshot();
        resubscribe_all(&mut sink, &desired, state.config.max_outgoing_message_bytes).await;

        // ── 4. Inner select! loop ────────────────────────────────────────
        let reason = run_connected(&mut state, sink, stream).await;

        // ── 5. Post-disconnect decision ──────────────────────────────────
        match reason {
            DisconnectReason::UserRequested => {
                state.shared.set_state(ConnectionState::Disconnected);
                tracing::info!("WebSocket disconnected by client");
                return;
            }
            DisconnectReason::Lost(reason) => {
                tracing::warn!("WebSocket connection lost: {}", reason);
                if state.should_reconnect() {
                    state.shared.set_state(ConnectionState::Connecting);
                    if backoff_sleep(&mut state).await {
                        continue;
                    }
                    state.shared.set_state(ConnectionState::Disconnected);
                    return;
                }
                give_up(&state);
                return;
            }
        }
    }
}

/// The inner connected loop: runs until the connection breaks.
async fn run_connected(
    state: &mut TaskState,
    mut sink: WsSink,
    mut stream: SplitStream<WsStream>,
) -> DisconnectReason {
    let mut ping_interval = tokio::time::interval(state.config.ping_interval());
    ping_interval.reset(); // skip immediate first tick

    let mut awaiting_pong = false;
    let far_future = tokio::time::Instant::now() + Duration::from_secs(86400);
    let pong_sleep = tokio::time::sleep_until(far_future);
    tokio::pin!(pong_sleep);

    loop {
        tokio::select! {
            // ── a) Incoming WS message ───────────────────────────────────
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_str: &str = text.as_ref();
                        handle_text(state, text_str);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                        pong_sleep.as_mut().reset(far_future);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        state.emit(WsEvent::Disconnected {
                            code: Some(code),
                            reason: reason.clone(),
                        });
                        return DisconnectReason::Lost(format!("Server closed ({}): {}", code, reason));
                    }
                    Some(Ok(_)) => {} // Binary, Frame: ignore
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        tracing::error!("WebSocket error: {}", reason);
                        state.emit(WsEvent::Disconnected {
                            code: None,
                            reason: reason.clone(),
                        });
                        return DisconnectReason::Lost(reason);
                    }
                    None => {
                        state.emit(WsEvent::Disconnected {
                            code: None,
                            reason: "Stream ended".into(),
                        });
                        return DisconnectReason::Lost("Stream ended".into());
                    }
                }
            }

            // ── b) Command from public API ───────────────────────────────
            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(json)) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            let reason = e.to_string();
                            tracing::warn!("Send failed: {}", reason);
                            state.emit(WsEvent::Disconnected {
                                code: None,
                                reason: reason.clone(),
                            });
                            return DisconnectReason::Lost(reason);
                        }
                    }
                    Some(Command::Disconnect) => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client disconnect".into(),
                        }))).await;
                        return DisconnectReason::UserRequested;
                    }
                    None => {
                        // WsClient dropped: clean exit
                        return DisconnectReason::UserRequested;
                    }
                }
            }

            // ── c) Ping interval ─────────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong {
                    continue;
                }
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    tracing::warn!("Failed to send ping: {}", e);
                } else {
                    awaiting_pong = true;
                    pong_sleep
                        .as_mut()
                        .reset(tokio::time::Instant::now() + state.config.pong_timeout());
                }
            }

            // ── d) Pong timeout ──────────────────────────────────────────
            () = &mut pong_sleep, if awaiting_pong => {
                tracing::warn!(
                    "Pong timeout: no response within {}ms",
                    state.config.pong_timeout_ms
                );
                state.emit(WsEvent::Disconnected {
                    code: None,
                    reason: "Pong timeout".into(),
                });
                let _ = sink.close().await;
                return DisconnectReason::Lost("Pong timeout".into());
            }
        }
    }
}

/// Size-check, decode and fan out one inbound text frame.
fn handle_text(state: &TaskState, text: &str) {
    let limit = state.config.max_incoming_message_bytes;
    if text.len() > limit {
        tracing::warn!("Dropping inbound frame of {} bytes (limit {})", text.len(), limit);
        state.emit(WsEvent::Error(
            WsError::MessageTooLarge {
                size: text.len(),
                limit,
            }
            .to_string(),
        ));
        return;
    }

    match decode_frame(text) {
        Ok(kind) => {
            tracing::debug!("Inbound '{}'", kind.name());
            state.shared.dispatch(&kind);
            state.emit(WsEvent::Message(kind));
        }
        Err(e) => {
            tracing::warn!("Dropping inbound frame: {}", e);
            state.emit(WsEvent::Error(e.to_string()));
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Attempt to establish a WebSocket connection with a 30-second timeout.
async fn attempt_connect(url: &Url) -> Result<(WsSink, SplitStream<WsStream>), WsError> {
    let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
        .await
        .map_err(|_| WsError::ConnectionFailed("Connection timeout".into()))?
        .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

    Ok(ws_stream.split())
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}

fn give_up(state: &TaskState) {
    tracing::error!(
        "Giving up after {} reconnect attempt(s)",
        state.config.max_reconnect_attempts
    );
    state.shared.set_state(ConnectionState::Error);
    state.emit(WsEvent::MaxReconnectReached);
}

// ─── Subscription tracking ──────────────────────────────────────────────────

fn track_subscription(desired: &mut DesiredSubscriptions, msg: &MessageOut) {
    match msg {
        MessageOut::Subscribe(params) => {
            desired.insert(params.clone());
        }
        MessageOut::Unsubscribe(params) => {
            desired.remove(params);
        }
    }
}

async fn resubscribe_all(sink: &mut WsSink, subs: &[SubscribeParams], max_bytes: usize) {
    if subs.is_empty() {
        return;
    }
    tracing::info!("Resubscribing to {} tracked subscription(s)", subs.len());
    for sub in subs {
        let msg = MessageOut::Subscribe(sub.clone());
        let sent = match msg.encode(max_bytes) {
            Ok(json) => sink.send(Message::Text(json.into())).await.map_err(WsError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::warn!("Failed to resubscribe {}: {}", sub.subscription_key(), e);
        }
    }
}

// ─── Reconnection backoff ────────────────────────────────────────────────────

fn reconnect_delay(config: &WsConfig, attempt: u32) -> Duration {
    let delay = config.reconnect_delay(attempt);
    if !config.reconnect_jitter {
        return delay;
    }
    let spread = (delay.as_millis() as u64 / 4).max(1);
    let jitter = rand::thread_rng().gen_range(0..=spread);
    delay + Duration::from_millis(jitter)
}

/// Sleep before the next attempt. Returns `false` if a disconnect arrived
/// (or the client was dropped) during the wait.
async fn backoff_sleep(state: &mut TaskState) -> bool {
    let delay = reconnect_delay(&state.config, state.reconnect_attempts);
    state.reconnect_attempts += 1;

    tracing::info!(
        "Reconnect attempt {}/{} in {}ms",
        state.reconnect_attempts,
        state.config.max_reconnect_attempts,
        delay.as_millis()
    );

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            cmd = state.cmd_rx.recv() => match cmd {
                // Already in the desired set; replayed after reconnect.
                Some(Command::Send(_)) => {}
                Some(Command::Disconnect) | None => return false,
            },
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
