// =============================================================================
// WebSocket Manager — resilient venue stream sessions with subscriber fan-out
// =============================================================================
//
// One manager owns one long-lived socket to a venue. The venue-specific
// framing (how to parse an incoming frame into a channel + payload, how to
// phrase subscribe/unsubscribe requests) is supplied by a `StreamAdapter`.
//
// State machine:
//   Disconnected -> Connecting -> Connected -> (Reconnecting <-> Connecting)
//                                           -> Disconnected
//
// The receive loop is the sole reader of the socket. Subscribers never run
// on the receive loop: each subscription owns an unbounded queue drained by
// its own dispatch task, which preserves per-channel ordering for that
// subscriber and isolates callback panics from the session.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::WebSocketConfig;
use crate::errors::{ExchangeError, ExchangeResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// ---------------------------------------------------------------------------
// Stream adapter contract
// ---------------------------------------------------------------------------

/// A parsed inbound frame: which logical channel it belongs to and its
/// payload.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Subscriber callback. Must not block; heavy work belongs in the
/// subscriber's own task.
pub type StreamCallback = Arc<dyn Fn(StreamMessage) + Send + Sync>;

/// Venue-specific framing rules.
pub trait StreamAdapter: Send + Sync {
    /// Parse a raw TEXT frame. `None` drops the frame (heartbeats,
    /// acknowledgements, malformed payloads).
    fn parse_message(&self, raw: &str) -> Option<StreamMessage>;

    /// Wire text that subscribes to `channel`, if the venue needs one.
    fn build_subscribe(&self, channel: &str) -> Option<String>;

    /// Wire text that unsubscribes from `channel`, if the venue supports it.
    fn build_unsubscribe(&self, channel: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription manager
// ---------------------------------------------------------------------------

struct SubscriptionEntry {
    channel: String,
    sender: tokio::sync::mpsc::UnboundedSender<StreamMessage>,
    task: tokio::task::JoinHandle<()>,
}

/// Maps subscription ids to dispatch queues and keeps a reverse
/// channel -> ids index for routing.
pub struct SubscriptionManager {
    next_id: AtomicU64,
    entries: RwLock<HashMap<String, SubscriptionEntry>>,
    by_channel: RwLock<HashMap<String, HashSet<String>>>,
    routing_errors: Arc<AtomicU64>,
    messages_routed: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
            by_channel: RwLock::new(HashMap::new()),
            routing_errors: Arc::new(AtomicU64::new(0)),
            messages_routed: AtomicU64::new(0),
        }
    }

    /// Register a callback for `channel` and return the opaque
    /// subscription id. Ids are minted by a monotonic counter and never
    /// reused within a process.
    pub fn subscribe(&self, channel: &str, callback: StreamCallback) -> String {
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel::<StreamMessage>();
        let errors = self.routing_errors.clone();
        // Dedicated dispatch task: per-subscription ordering, and a
        // panicking callback cannot take down the receive loop.
        let task = tokio::spawn(async move {
            while let Some(msg) = receiver.recv().await {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(msg)));
                if outcome.is_err() {
                    errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        self.entries.write().insert(
            id.clone(),
            SubscriptionEntry {
                channel: channel.to_string(),
                sender,
                task,
            },
        );
        self.by_channel
            .write()
            .entry(channel.to_string())
            .or_default()
            .insert(id.clone());

        debug!(id = %id, channel = %channel, "subscription registered");
        id
    }

    /// Remove a subscription. Returns the channel it was attached to if the
    /// id was known. The dispatch task is cancelled immediately.
    pub fn unsubscribe(&self, id: &str) -> Option<String> {
        let entry = self.entries.write().remove(id)?;
        entry.task.abort();

        let mut index = self.by_channel.write();
        if let Some(ids) = index.get_mut(&entry.channel) {
            ids.remove(id);
            if ids.is_empty() {
                index.remove(&entry.channel);
            }
        }
        debug!(id = %id, channel = %entry.channel, "subscription removed");
        Some(entry.channel)
    }

    pub fn unsubscribe_all(&self) {
        let ids: Vec<String> = self.entries.read().keys().cloned().collect();
        for id in ids {
            self.unsubscribe(&id);
        }
    }

    /// Hand `msg` to every subscriber of its channel, in arrival order per
    /// subscriber. Returns the number of queues reached.
    pub fn route(&self, msg: &StreamMessage) -> usize {
        let ids: Vec<String> = match self.by_channel.read().get(&msg.channel) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return 0,
        };

        let entries = self.entries.read();
        let mut delivered = 0;
        for id in ids {
            if let Some(entry) = entries.get(&id) {
                if entry.sender.send(msg.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        if delivered > 0 {
            self.messages_routed.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }

    /// Distinct channels with at least one live subscriber.
    pub fn channels(&self) -> Vec<String> {
        self.by_channel.read().keys().cloned().collect()
    }

    pub fn channel_of(&self, id: &str) -> Option<String> {
        self.entries.read().get(id).map(|e| e.channel.clone())
    }

    /// Remaining subscriber count for a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.by_channel.read().get(channel).map_or(0, HashSet::len)
    }

    pub fn active_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn routing_errors(&self) -> u64 {
        self.routing_errors.load(Ordering::Relaxed)
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// WebSocket manager
// ---------------------------------------------------------------------------

/// Per-manager counters surfaced to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct WebSocketMetrics {
    pub connected: bool,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub errors: u64,
    pub reconnect_attempts: u64,
    pub active_subscriptions: usize,
    pub routing_errors: u64,
}

struct Inner {
    url: String,
    config: WebSocketConfig,
    connect_timeout: Duration,
    adapter: Arc<dyn StreamAdapter>,
    subscriptions: SubscriptionManager,
    state: AtomicU8,
    writer: tokio::sync::Mutex<Option<WsSink>>,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    errors: AtomicU64,
    reconnect_attempts: AtomicU64,
    last_pong_ms: AtomicI64,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    async fn send_text(&self, text: String) -> ExchangeResult<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or_else(|| {
            ExchangeError::connection("websocket writer not available")
        })?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| ExchangeError::connection(format!("websocket send failed: {e}")))?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Re-issue subscribe frames for every live channel (used after a
    /// reconnect).
    async fn resubscribe_all(&self) {
        for channel in self.subscriptions.channels() {
            if let Some(text) = self.adapter.build_subscribe(&channel) {
                if let Err(e) = self.send_text(text).await {
                    warn!(channel = %channel, error = %e, "resubscribe failed");
                }
            }
        }
    }
}

/// Long-lived venue stream session. Owned by a connector; cheap to share.
pub struct WebSocketManager {
    inner: Arc<Inner>,
    receive_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WebSocketManager {
    pub fn new(
        url: impl Into<String>,
        config: WebSocketConfig,
        connect_timeout: Duration,
        adapter: Arc<dyn StreamAdapter>,
    ) -> Self {
        let url = config.url.clone().unwrap_or_else(|| url.into());
        Self {
            inner: Arc::new(Inner {
                url,
                config,
                connect_timeout,
                adapter,
                subscriptions: SubscriptionManager::new(),
                state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
                writer: tokio::sync::Mutex::new(None),
                messages_received: AtomicU64::new(0),
                messages_sent: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                reconnect_attempts: AtomicU64::new(0),
                last_pong_ms: AtomicI64::new(0),
            }),
            receive_task: parking_lot::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnectionState::Connected
    }

    /// Open the socket and start the receive loop. Errors if the manager is
    /// not Disconnected (redundant connect is a caller bug by contract).
    pub async fn connect(&self) -> ExchangeResult<()> {
        if self.inner.state() != ConnectionState::Disconnected {
            return Err(ExchangeError::Connection {
                message: "websocket already connected or connecting".into(),
                retryable: false,
            });
        }
        self.inner.set_state(ConnectionState::Connecting);

        let source = match Self::open_socket(&self.inner).await {
            Ok(source) => source,
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.inner.set_state(ConnectionState::Connected);
        info!(url = %self.inner.url, "websocket connected");

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            receive_loop(inner, source).await;
        });
        *self.receive_task.lock() = Some(handle);
        Ok(())
    }

    async fn open_socket(inner: &Inner) -> ExchangeResult<WsSource> {
        let connect = connect_async(&inner.url);
        let (stream, _response) = tokio::time::timeout(inner.connect_timeout, connect)
            .await
            .map_err(|_| ExchangeError::timeout(format!("websocket connect to {}", inner.url)))?
            .map_err(|e| {
                ExchangeError::connection(format!("websocket connect failed: {e}"))
            })?;

        let (sink, source) = stream.split();
        *inner.writer.lock().await = Some(sink);
        Ok(source)
    }

    /// Tear the session down. Idempotent: disconnecting a disconnected
    /// manager is a no-op. All subscriptions die with the session.
    pub async fn disconnect(&self) {
        if self.inner.state() == ConnectionState::Disconnected {
            return;
        }
        // Flag intent first so the receive loop does not try to reconnect.
        self.inner.set_state(ConnectionState::Disconnected);

        if let Some(handle) = self.receive_task.lock().take() {
            handle.abort();
        }
        if let Some(mut sink) = self.writer_take().await {
            let _ = sink.send(Message::Close(None)).await;
        }
        self.inner.subscriptions.unsubscribe_all();
        info!(url = %self.inner.url, "websocket disconnected");
    }

    async fn writer_take(&self) -> Option<WsSink> {
        self.inner.writer.lock().await.take()
    }

    /// Send raw wire text. Only valid while Connected.
    pub async fn send(&self, text: impl Into<String>) -> ExchangeResult<()> {
        if self.inner.state() != ConnectionState::Connected {
            return Err(ExchangeError::connection(
                "websocket not connected, cannot send",
            ));
        }
        self.inner.send_text(text.into()).await
    }

    /// Register a subscriber and, when connected, send the venue's
    /// subscribe frame for the channel.
    pub async fn subscribe(
        &self,
        channel: &str,
        callback: StreamCallback,
    ) -> ExchangeResult<String> {
        let first_for_channel = self.inner.subscriptions.subscriber_count(channel) == 0;
        let id = self.inner.subscriptions.subscribe(channel, callback);

        if first_for_channel && self.inner.state() == ConnectionState::Connected {
            if let Some(text) = self.inner.adapter.build_subscribe(channel) {
                if let Err(e) = self.inner.send_text(text).await {
                    self.inner.subscriptions.unsubscribe(&id);
                    return Err(e);
                }
            }
        }
        Ok(id)
    }

    /// Drop a subscription; sends the venue's unsubscribe frame when the
    /// last subscriber of a channel leaves.
    pub async fn unsubscribe(&self, id: &str) -> ExchangeResult<()> {
        let channel = self
            .inner
            .subscriptions
            .unsubscribe(id)
            .ok_or_else(|| {
                ExchangeError::exchange("subscription", format!("unknown subscription id '{id}'"))
            })?;

        if self.inner.subscriptions.subscriber_count(&channel) == 0
            && self.inner.state() == ConnectionState::Connected
        {
            if let Some(text) = self.inner.adapter.build_unsubscribe(&channel) {
                let _ = self.inner.send_text(text).await;
            }
        }
        Ok(())
    }

    pub fn unsubscribe_all(&self) {
        self.inner.subscriptions.unsubscribe_all();
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    pub fn metrics(&self) -> WebSocketMetrics {
        WebSocketMetrics {
            connected: self.is_connected(),
            messages_received: self.inner.messages_received.load(Ordering::Relaxed),
            messages_sent: self.inner.messages_sent.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::Relaxed),
            active_subscriptions: self.inner.subscriptions.active_count(),
            routing_errors: self.inner.subscriptions.routing_errors(),
        }
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

async fn receive_loop(inner: Arc<Inner>, mut source: WsSource) {
    loop {
        // Drain the current socket until it closes or errors.
        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    inner.messages_received.fetch_add(1, Ordering::Relaxed);
                    match inner.adapter.parse_message(&text) {
                        Some(msg) => {
                            inner.subscriptions.route(&msg);
                        }
                        None => {
                            debug!("dropped unroutable websocket frame");
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("ignoring binary websocket frame");
                }
                Some(Ok(Message::Ping(data))) => {
                    let mut writer = inner.writer.lock().await;
                    if let Some(sink) = writer.as_mut() {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    inner
                        .last_pong_ms
                        .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(?frame, "websocket closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    inner.errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "websocket read error");
                    break;
                }
                None => {
                    warn!("websocket stream ended");
                    break;
                }
            }
        }

        // User-initiated disconnect: the manager already reset the state.
        if inner.state() == ConnectionState::Disconnected {
            return;
        }
        if !inner.config.auto_reconnect {
            inner.set_state(ConnectionState::Disconnected);
            return;
        }

        inner.set_state(ConnectionState::Reconnecting);
        match reconnect(&inner).await {
            Some(new_source) => {
                source = new_source;
                inner.set_state(ConnectionState::Connected);
                inner.resubscribe_all().await;
                info!(url = %inner.url, "websocket reconnected");
            }
            None => {
                inner.set_state(ConnectionState::Disconnected);
                error!(
                    url = %inner.url,
                    attempts = inner.config.max_reconnect_attempts,
                    "websocket reconnect attempts exhausted"
                );
                return;
            }
        }
    }
}

/// Fixed-delay reconnect, up to `max_reconnect_attempts`. Returns the new
/// read half on success.
async fn reconnect(inner: &Arc<Inner>) -> Option<WsSource> {
    let delay = Duration::from_millis(inner.config.reconnect_delay_ms);
    for attempt in 1..=inner.config.max_reconnect_attempts {
        tokio::time::sleep(delay).await;
        if inner.state() == ConnectionState::Disconnected {
            // Disconnected by the user while we were backing off.
            return None;
        }
        inner.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        info!(attempt, url = %inner.url, "websocket reconnect attempt");

        match WebSocketManager::open_socket(inner).await {
            Ok(source) => return Some(source),
            Err(e) => {
                inner.errors.fetch_add(1, Ordering::Relaxed);
                warn!(attempt, error = %e, "websocket reconnect failed");
            }
        }
    }
    None
}
