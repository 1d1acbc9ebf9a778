//! WebSocket sub-client (§4.10 "WebSocket client"). One persistent
//! socket with token handshake, three concurrent sub-tasks under one
//! supervisor, and exponential reconnect backoff. Grounded in
//! `original_source/agent/communication.py`'s `websockets` reconnect
//! loop, adapted to `tokio-tungstenite`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct WsClient {
    url: String,
    device_token: String,
}

impl WsClient {
    pub fn new(url: String, device_token: String) -> Self {
        Self { url, device_token }
    }

    /// Runs forever (until `stop` fires): connect, authenticate, run
    /// the reader/writer/heartbeat supervisor, and on any failure back
    /// off before retrying. `outgoing` lets the caller enqueue extra
    /// frames (beyond the built-in heartbeat) for the writer to send.
    pub async fn run(
        &self,
        stop: CancellationToken,
        heartbeat_interval: Duration,
        mut outgoing: mpsc::UnboundedReceiver<Value>,
        on_message: Arc<dyn Fn(Value) + Send + Sync>,
    ) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if stop.is_cancelled() {
                return;
            }

            match self.connect_and_serve(&stop, heartbeat_interval, &mut outgoing, &on_message).await {
                Ok(()) => backoff = INITIAL_BACKOFF,
                Err(err) => {
                    tracing::warn!(err = %err, "websocket connection failed");
                }
            }

            if stop.is_cancelled() {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = stop.cancelled() => return,
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn connect_and_serve(
        &self,
        stop: &CancellationToken,
        heartbeat_interval: Duration,
        outgoing: &mut mpsc::UnboundedReceiver<Value>,
        on_message: &Arc<dyn Fn(Value) + Send + Sync>,
    ) -> anyhow::Result<()> {
        let (socket, _) = tokio_tungstenite::connect_async(&self.url).await?;
        let (mut write, mut read) = socket.split();

        write.send(Message::Text(self.device_token.clone().into())).await?;
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(&text)?;
                if value.get("type").and_then(Value::as_str) != Some("auth_ok") {
                    anyhow::bail!("handshake rejected: {text}");
                }
            }
            other => anyhow::bail!("expected auth_ok, got {other:?}"),
        }

        let mut heartbeat_tick = tokio::time::interval(heartbeat_interval);
        heartbeat_tick.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    let _ = write.close().await;
                    return Ok(());
                }
                _ = heartbeat_tick.tick() => {
                    if write.send(Message::Text(r#"{"type":"heartbeat"}"#.into())).await.is_err() {
                        anyhow::bail!("heartbeat send failed");
                    }
                }
                msg = outgoing.recv() => {
                    match msg {
                        Some(value) => {
                            let text = serde_json::to_string(&value)?;
                            if write.send(Message::Text(text.into())).await.is_err() {
                                anyhow::bail!("outgoing send failed");
                            }
                        }
                        None => anyhow::bail!("outgoing queue closed"),
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Value>(&text) {
                                Ok(value) => on_message(value),
                                Err(_) => tracing::debug!(%text, "dropped non-JSON websocket message"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => anyhow::bail!("socket closed by server"),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => anyhow::bail!("websocket read error: {err}"),
                    }
                }
            }
        }
    }
}
