use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use common::error::FeedError;
use common::models::{ChannelEvent, LinkState};

use crate::remote::{Backoff, parse_frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` on the handshake.
    pub token: Option<String>,
    pub backoff: Backoff,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            backoff: Backoff::default(),
        }
    }
}

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    handler: EventHandler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

struct Shared {
    config: ChannelConfig,
    state_tx: watch::Sender<LinkState>,
    registry: Mutex<Registry>,
    session: Mutex<Option<JoinHandle<()>>>,
    // Bumped on every disconnect; a session only acts while its epoch is current.
    epoch: AtomicU64,
}

/// One logical push connection fanned out to any number of subscribers.
///
/// The connection runs in its own task and reconnects with capped exponential
/// backoff until `disconnect()` is called. Cloning yields another handle to the
/// same connection.
#[derive(Clone)]
pub struct SignalChannel {
    shared: Arc<Shared>,
}

impl SignalChannel {
    pub fn new(config: ChannelConfig) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                state_tx,
                registry: Mutex::new(Registry::default()),
                session: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state_tx.subscribe()
    }

    /// Starts the session task. No-op while a session is already connecting,
    /// connected or backing off.
    pub fn connect(&self) {
        let mut session = self.shared.session.lock();
        if let Some(handle) = session.as_ref() {
            if !handle.is_finished() {
                debug!("Signal channel already {}, ignoring connect", self.state());
                return;
            }
        }

        let epoch = self.shared.epoch.load(Ordering::Acquire);
        self.shared.transition(epoch, LinkState::Connecting);

        let shared = Arc::clone(&self.shared);
        *session = Some(tokio::spawn(async move { shared.run(epoch).await }));
    }

    /// Tears the session down and returns to `Disconnected`. Safe to call
    /// repeatedly; no subscriber is called back afterwards.
    pub fn disconnect(&self) {
        let mut session = self.shared.session.lock();
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = session.take() {
            handle.abort();
            info!("Signal channel disconnected from {}", self.shared.config.url);
        }
        self.shared.state_tx.send_replace(LinkState::Disconnected);
    }

    /// Registers `handler` for every inbound event (`Connected` and `Signal`).
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let mut registry = self.shared.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.push(Subscriber {
            id,
            active: Arc::clone(&active),
            handler: Arc::new(handler),
        });

        Subscription {
            id,
            active,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.lock().subscribers.len()
    }
}

/// Handle returned by [`SignalChannel::subscribe`].
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Stops further callbacks. Idempotent.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(shared) = self.shared.upgrade() {
            shared
                .registry
                .lock()
                .subscribers
                .retain(|s| s.id != self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    fn transition(&self, epoch: u64, state: LinkState) {
        if self.is_current(epoch) {
            self.state_tx.send_replace(state);
        }
    }

    fn publish(&self, epoch: u64, event: &ChannelEvent) {
        let handlers: Vec<(Arc<AtomicBool>, EventHandler)> = self
            .registry
            .lock()
            .subscribers
            .iter()
            .map(|s| (Arc::clone(&s.active), Arc::clone(&s.handler)))
            .collect();

        for (active, handler) in handlers {
            if !self.is_current(epoch) {
                return;
            }
            if active.load(Ordering::Acquire) {
                handler(event);
            }
        }
    }

    async fn run(self: Arc<Self>, epoch: u64) {
        let mut attempt: u32 = 0;

        loop {
            self.transition(epoch, LinkState::Connecting);

            match self.open().await {
                Ok(ws_stream) => {
                    attempt = 0;
                    info!("Signal channel connected to {}", self.config.url);
                    self.transition(epoch, LinkState::Connected);
                    self.publish(epoch, &ChannelEvent::Connected);

                    self.pump(epoch, ws_stream).await;
                    warn!("Signal channel to {} dropped", self.config.url);
                }
                Err(e) => {
                    error!("Signal channel connection failed: {}", e);
                }
            }

            if !self.is_current(epoch) {
                return;
            }
            self.transition(epoch, LinkState::Reconnecting);

            let delay = self.config.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            info!("Reconnecting signal channel in {:?} (attempt {})", delay, attempt);
            time::sleep(delay).await;
        }
    }

    async fn open(&self) -> Result<WsStream, FeedError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| FeedError::Transport(format!("invalid channel url: {e}")))?;

        if let Some(token) = &self.config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| FeedError::Transport(format!("invalid access token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        Ok(ws_stream)
    }

    /// Reads frames until the connection ends.
    async fn pump(&self, epoch: u64, ws_stream: WsStream) {
        let (mut write, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match parse_frame(text.as_str()) {
                    Ok(Some(event)) => self.publish(epoch, &event),
                    Ok(None) => debug!("Ignoring frame of unhandled type"),
                    Err(e) => warn!("Dropping push frame: {}", e),
                },
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        warn!("Failed to answer ping: {}", e);
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!("Close frame received: {:?}", frame);
                    break;
                }
                Ok(Message::Binary(payload)) => {
                    debug!("Ignoring {} byte binary frame", payload.len());
                }
                Ok(_) => {}
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> impl Fn(&ChannelEvent) + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_new_channel_is_disconnected() {
        let channel = SignalChannel::new(ChannelConfig::new("ws://127.0.0.1:1/ws"));
        assert_eq!(channel.state(), LinkState::Disconnected);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let channel = SignalChannel::new(ChannelConfig::new("ws://127.0.0.1:1/ws"));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let _a = channel.subscribe(counting_handler(&first));
        let _b = channel.subscribe(counting_handler(&second));

        channel.shared.publish(0, &ChannelEvent::Connected);
        channel.shared.publish(0, &ChannelEvent::Connected);

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_stops_callbacks() {
        let channel = SignalChannel::new(ChannelConfig::new("ws://127.0.0.1:1/ws"));
        let counter = Arc::new(AtomicUsize::new(0));
        let subscription = channel.subscribe(counting_handler(&counter));

        channel.shared.publish(0, &ChannelEvent::Connected);
        subscription.unsubscribe();
        subscription.unsubscribe();
        channel.shared.publish(0, &ChannelEvent::Connected);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!subscription.is_active());
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn test_stale_session_cannot_publish_after_disconnect() {
        let channel = SignalChannel::new(ChannelConfig::new("ws://127.0.0.1:1/ws"));
        let counter = Arc::new(AtomicUsize::new(0));
        let _sub = channel.subscribe(counting_handler(&counter));

        channel.disconnect();
        channel.disconnect();
        channel.shared.publish(0, &ChannelEvent::Connected);
        channel.shared.transition(0, LinkState::Connected);

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(channel.state(), LinkState::Disconnected);
    }
}
