//! Local feed server for the native integration tests.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub enum ServerCmd {
    Text(String),
    /// Drop the socket without a close frame.
    Kill,
}

/// One accepted client connection.
pub struct Conn {
    pub tx: mpsc::UnboundedSender<ServerCmd>,
    pub received: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl Conn {
    pub fn send(&self, frame: serde_json::Value) {
        self.tx.send(ServerCmd::Text(frame.to_string())).unwrap();
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        self.tx.send(ServerCmd::Text(text.into())).unwrap();
    }

    pub fn kill(&self) {
        let _ = self.tx.send(ServerCmd::Kill);
    }

    /// Next client frame, or panic after the test timeout.
    pub async fn recv(&mut self) -> serde_json::Value {
        tokio::time::timeout(TEST_TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("connection closed")
    }

    /// Collect `n` client frames as `(event, room)` pairs.
    pub async fn recv_n(&mut self, n: usize) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let frame = self.recv().await;
            out.push((
                frame["event"].as_str().unwrap_or_default().to_string(),
                frame["data"]["room"].as_str().unwrap_or_default().to_string(),
            ));
        }
        out
    }

    /// Whether another frame arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.received.recv()).await.is_err()
    }
}

pub struct MockServer {
    pub url: String,
    connections: mpsc::UnboundedReceiver<Conn>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                let (frame_tx, frame_rx) = mpsc::unbounded_channel();
                if conn_tx
                    .send(Conn {
                        tx: cmd_tx,
                        received: frame_rx,
                    })
                    .is_err()
                {
                    return;
                }
                tokio::spawn(serve(ws, cmd_rx, frame_tx));
            }
        });

        Self { url, connections }
    }

    pub async fn accept(&mut self) -> Conn {
        tokio::time::timeout(TEST_TIMEOUT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut cmd_rx: mpsc::UnboundedReceiver<ServerCmd>,
    frame_tx: mpsc::UnboundedSender<serde_json::Value>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let text: &str = text.as_ref();
                    if let Ok(value) = serde_json::from_str(text) {
                        let _ = frame_tx.send(value);
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(ServerCmd::Text(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Some(ServerCmd::Kill) | None => return,
            },
        }
    }
}

/// A port nothing listens on.
pub fn unused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("ws://127.0.0.1:{}/ws", port)
}

pub fn tick(pair: &str, price: &str, outlier: bool) -> serde_json::Value {
    serde_json::json!({
        "event": "tick",
        "data": {
            "pairAddress": pair,
            "priceUsd": price,
            "isOutlier": outlier,
            "timestamp": 1_700_000_000_000i64,
        }
    })
}

/// Poll `check` until it holds or the test timeout passes.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
