//! WebSocket channel with automatic reconnection after unexpected closes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_with::{DurationMilliSeconds, serde_as};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use turbolink_traits::{
    Channel, HealthCheckResult, TransportError, TransportReply, TransportResult,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Capacity of the inbound message broadcast
const INBOUND_CAPACITY: usize = 64;

/// WebSocket channel configuration
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebSocketChannelConfig {
    /// Socket URL (`ws://` or `wss://`)
    pub url: String,

    /// Delay between reconnect attempts after an unexpected close
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "reconnectIntervalMs")]
    pub reconnect_interval: Duration,

    /// Upper bound on the opening handshake
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "connectTimeoutMs")]
    pub connect_timeout: Duration,

    /// Upper bound on writing one frame
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "sendTimeoutMs")]
    pub send_timeout: Duration,

    /// Subprotocols offered in `Sec-WebSocket-Protocol`, most preferred first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
}

impl Default for WebSocketChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001".to_string(),
            reconnect_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
            protocols: Vec::new(),
        }
    }
}

impl WebSocketChannelConfig {
    /// Configuration for `url` with default timings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the reconnect interval
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the handshake timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the send timeout
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Offer subprotocols during the opening handshake
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Handshake request for this configuration.
    fn client_request(&self) -> TransportResult<Request> {
        let mut request = self.url.as_str().into_client_request().map_err(|e| {
            TransportError::Configuration(format!("invalid WebSocket URL {}: {e}", self.url))
        })?;
        if !self.protocols.is_empty() {
            let offered = HeaderValue::from_str(&self.protocols.join(", ")).map_err(|e| {
                TransportError::Configuration(format!("invalid WebSocket subprotocol: {e}"))
            })?;
            request
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, offered);
        }
        Ok(request)
    }
}

/// [`Channel`] over a WebSocket.
///
/// Sends are fire-and-forget text frames; a write that reaches the socket is
/// acknowledged with `{"success": true}` and status 200. Frames arriving from
/// the server are parsed as JSON and published on [`subscribe_messages`].
///
/// If the socket closes without [`Channel::disconnect`] having been called, a
/// background task retries the connection every `reconnect_interval` until it
/// succeeds or the channel is disconnected.
///
/// [`subscribe_messages`]: WebSocketChannel::subscribe_messages
#[derive(Debug)]
pub struct WebSocketChannel {
    inner: Arc<SocketState>,
}

#[derive(Debug)]
struct SocketState {
    config: WebSocketChannelConfig,
    writer: AsyncMutex<Option<WsWriter>>,
    open: AtomicBool,
    /// Set by `disconnect`, cleared by `connect`; suppresses reconnection
    closing: AtomicBool,
    /// Bumped for every opened socket so a stale reader cannot close a newer one
    generation: AtomicU64,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    inbound: broadcast::Sender<Value>,
}

impl WebSocketChannel {
    /// Create a channel. Nothing is opened until [`Channel::connect`].
    ///
    /// # Errors
    ///
    /// [`TransportError::Configuration`] if the URL does not parse, is not
    /// a `ws`/`wss` URL, or a subprotocol is not a valid header value.
    pub fn new(config: WebSocketChannelConfig) -> TransportResult<Self> {
        let url = Url::parse(&config.url).map_err(|e| {
            TransportError::Configuration(format!("invalid WebSocket URL {}: {e}", config.url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::Configuration(format!(
                "unsupported WebSocket scheme: {}",
                url.scheme()
            )));
        }
        config.client_request()?;

        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Ok(Self {
            inner: Arc::new(SocketState {
                config,
                writer: AsyncMutex::new(None),
                open: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                reader_task: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                inbound,
            }),
        })
    }

    /// Channel configuration
    pub fn config(&self) -> &WebSocketChannelConfig {
        &self.inner.config
    }

    /// Whether the socket is currently open
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Whether a reconnect loop is pending
    pub fn is_reconnecting(&self) -> bool {
        self.inner
            .reconnect_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Subscribe to JSON messages pushed by the server
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Value> {
        self.inner.inbound.subscribe()
    }
}

impl SocketState {
    async fn open_socket(self: &Arc<Self>) -> TransportResult<()> {
        let request = self.config.client_request()?;
        let timeout = self.config.connect_timeout;
        let (stream, response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::timeout("connect", timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let protocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let (writer, reader) = stream.split();

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.writer.lock().await = Some(writer);
        self.open.store(true, Ordering::Release);

        let task = tokio::spawn(read_loop(Arc::downgrade(self), reader, generation));
        if let Some(previous) = self.reader_task.lock().replace(task) {
            previous.abort();
        }

        info!(url = %self.config.url, protocol = ?protocol, "WebSocket connected");
        Ok(())
    }

    /// Called by the reader when its socket ends.
    async fn on_closed(self: &Arc<Self>, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.open.store(false, Ordering::Release);
        self.writer.lock().await.take();

        if self.closing.load(Ordering::Acquire) {
            debug!(url = %self.config.url, "WebSocket closed");
            return;
        }

        warn!(url = %self.config.url, "WebSocket closed unexpectedly");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let mut slot = self.reconnect_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = self.config.reconnect_interval;
        *slot = Some(tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                tokio::time::sleep(interval).await;
                let Some(state) = weak.upgrade() else { break };
                if state.closing.load(Ordering::Acquire) {
                    break;
                }

                attempt += 1;
                info!(url = %state.config.url, attempt, "Attempting WebSocket reconnect");
                match state.open_socket().await {
                    Ok(()) => break,
                    Err(e) => {
                        error!(url = %state.config.url, attempt, error = %e, "WebSocket reconnect failed");
                    }
                }
            }
        }));
    }

    fn stop_reconnect(&self) {
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
    }
}

async fn read_loop(state: Weak<SocketState>, mut reader: WsReader, generation: u64) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let Some(state) = state.upgrade() else { return };
                match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(value) => {
                        trace!(url = %state.config.url, "WebSocket message received");
                        let _ = state.inbound.send(value);
                    }
                    Err(e) => {
                        error!(url = %state.config.url, error = %e, "Failed to parse WebSocket message");
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "WebSocket close frame received");
                break;
            }
            // Pings are answered by tungstenite; binary frames are not part of the protocol
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "WebSocket read error");
                break;
            }
        }
    }

    if let Some(state) = state.upgrade() {
        state.on_closed(generation).await;
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    async fn connect(&self) -> TransportResult<()> {
        self.inner.closing.store(false, Ordering::Release);
        if self.is_open() {
            return Ok(());
        }
        self.inner.stop_reconnect();
        self.inner.open_socket().await
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.inner.closing.store(true, Ordering::Release);
        self.inner.stop_reconnect();
        if let Some(task) = self.inner.reader_task.lock().take() {
            task.abort();
        }

        self.inner.open.store(false, Ordering::Release);
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: Utf8Bytes::from_static("client disconnect"),
            };
            if let Err(e) = writer.send(Message::Close(Some(close))).await {
                debug!(error = %e, "WebSocket close frame not delivered");
            }
            let _ = writer.close().await;
            info!(url = %self.inner.config.url, "WebSocket disconnected");
        }
        Ok(())
    }

    async fn send(&self, payload: &Value) -> TransportResult<TransportReply> {
        let text = serde_json::to_string(payload)?;
        let timeout = self.inner.config.send_timeout;

        let mut writer = self.inner.writer.lock().await;
        let sink = match writer.as_mut() {
            Some(sink) if self.is_open() => sink,
            _ => return Err(TransportError::NotConnected("WebSocket is not open".into())),
        };

        match tokio::time::timeout(timeout, sink.send(Message::text(text))).await {
            Ok(Ok(())) => Ok(TransportReply::ok(json!({ "success": true }))),
            Ok(Err(e)) => Err(TransportError::SendFailed(e.to_string())),
            Err(_) => Err(TransportError::timeout("send", timeout)),
        }
    }

    async fn health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        if self.is_open() {
            HealthCheckResult::healthy(started.elapsed())
        } else {
            HealthCheckResult::unhealthy(
                started.elapsed(),
                TransportError::NotConnected("WebSocket is not open".into()),
            )
        }
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.inner.config.url.clone())
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.inner.stop_reconnect();
        if let Some(task) = self.inner.reader_task.lock().take() {
            task.abort();
        }
    }
}
