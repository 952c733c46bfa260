//! `ReconnectingClient`: the public client handle.

use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tether_core::envelope::to_payload;
use tether_core::{Closeable, Dispatcher, Envelope, GatewayError, HandlerId, Payload};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::events::ClientEvent;
use crate::queue::{Delivery, OutboundQueue};
use crate::transport;

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 64;

type HandlerFuture = BoxFuture<'static, Option<Value>>;

struct ClientState {
    queue: OutboundQueue,
    writer: Option<mpsc::UnboundedSender<Message>>,
    closed: bool,
}

pub(crate) struct ClientInner {
    pub(crate) url: String,
    pub(crate) source: String,
    pub(crate) config: ClientConfig,
    pub(crate) cancel: CancellationToken,
    state: Mutex<ClientState>,
    handlers: Dispatcher<Envelope, HandlerFuture>,
    events: broadcast::Sender<ClientEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    pub(crate) fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn transport_error(&self, message: String) {
        let err = GatewayError::Transport(message);
        warn!(url = %self.url, error_kind = err.error_kind(), error = %err, "transport error");
        self.emit(ClientEvent::Error(Arc::new(err)));
    }

    /// Install the writer for a fresh connection and flush the queue into
    /// it, atomically with respect to `send`.
    pub(crate) fn on_open(&self, writer: mpsc::UnboundedSender<Message>) -> usize {
        let flushed = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            let flushed = state.queue.flush(|text| {
                writer
                    .send(Message::text(text))
                    .map_err(|e| unsent_text(e.0))
            });
            state.writer = Some(writer);
            flushed
        };
        self.emit(ClientEvent::Open);
        flushed
    }

    pub(crate) fn on_disconnect(&self, dropped: bool) {
        self.state.lock().writer = None;
        if dropped {
            info!(url = %self.url, source = %self.source, "disconnected");
            self.emit(ClientEvent::Disconnected);
        }
    }

    /// The transport loop has stopped for good.
    pub(crate) fn finish(&self) {
        let _ = self.shut_state();
        self.emit(ClientEvent::Closed);
    }

    fn shut_state(&self) -> Option<mpsc::UnboundedSender<Message>> {
        let mut state = self.state.lock();
        state.closed = true;
        let dropped = state.queue.clear();
        if dropped > 0 {
            debug!(dropped, "discarded queued envelopes");
        }
        state.writer.take()
    }

    pub(crate) fn handle_text(self: &Arc<Self>, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = GatewayError::from(e);
                warn!(error_kind = err.error_kind(), error = %err, "dropping malformed envelope");
                self.emit(ClientEvent::Error(Arc::new(err)));
                return;
            }
        };

        let pending = self.handlers.emit(&envelope.kind, &envelope);
        debug!(
            kind = %envelope.kind,
            source = %envelope.source,
            handlers = pending.len(),
            "received envelope"
        );

        for future in pending {
            let weak: Weak<Self> = Arc::downgrade(self);
            let kind = envelope.kind.clone();
            drop(tokio::spawn(async move {
                let Some(result) = future.await else { return };
                if result.is_null() {
                    return;
                }
                let Some(inner) = weak.upgrade() else { return };
                let mut payload = Payload::new();
                let _ = payload.insert("result".into(), result);
                let _ = inner.send(&format!("{kind}:response"), payload);
            }));
        }
    }

    fn send(&self, kind: &str, payload: Payload) -> Delivery {
        let mut text = match Envelope::new(kind, self.source.as_str(), payload).encode() {
            Ok(text) => text,
            Err(e) => return Delivery::failed(e.into()),
        };

        let mut state = self.state.lock();
        if state.closed {
            return Delivery::failed(ClientError::Closed);
        }
        if state.queue.is_empty() {
            if let Some(writer) = state.writer.take() {
                match writer.send(Message::text(text)) {
                    Ok(()) => {
                        state.writer = Some(writer);
                        return Delivery::sent();
                    }
                    Err(e) => {
                        text = unsent_text(e.0);
                    }
                }
            }
        }
        state.queue.push(text)
    }
}

/// Recover the text of a frame the writer channel refused.
fn unsent_text(message: Message) -> String {
    message
        .into_text()
        .map(|text| text.as_str().to_owned())
        .unwrap_or_default()
}

/// A WebSocket client with a durable identity.
///
/// Cloning is cheap; clones share the same transport. The transport keeps
/// reconnecting until [`close`](Self::close) or
/// [`terminate`](Self::terminate) is called.
#[derive(Clone)]
pub struct ReconnectingClient {
    inner: Arc<ClientInner>,
}

impl ReconnectingClient {
    /// Start connecting to `url` as `source`. Must be called inside a Tokio
    /// runtime.
    pub fn connect(url: impl Into<String>, source: impl Into<String>, config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(ClientInner {
            url: url.into(),
            source: source.into(),
            config,
            cancel: CancellationToken::new(),
            state: Mutex::new(ClientState {
                queue: OutboundQueue::new(),
                writer: None,
                closed: false,
            }),
            handlers: Dispatcher::new(),
            events,
            task: Mutex::new(None),
        });
        let task = tokio::spawn(transport::run(Arc::clone(&inner)));
        *inner.task.lock() = Some(task);
        Self { inner }
    }

    /// Identity this client sends as.
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Server URL.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Send an envelope.
    ///
    /// Enqueued synchronously; the returned [`Delivery`] resolves once the
    /// envelope reaches the transport, which may be after a reconnect.
    pub fn send(&self, kind: &str, payload: Payload) -> Delivery {
        self.inner.send(kind, payload)
    }

    /// Serialize `value` into payload fields and send it.
    pub fn send_json<T: Serialize + ?Sized>(&self, kind: &str, value: &T) -> Delivery {
        match to_payload(value) {
            Ok(payload) => self.send(kind, payload),
            Err(e) => Delivery::failed(e.into()),
        }
    }

    /// Subscribe to inbound envelopes of `kind`.
    ///
    /// If the handler resolves to a non-null value, it is sent back as
    /// `"<kind>:response"` with a `result` field.
    pub fn on<F, Fut>(&self, kind: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Value>> + Send + 'static,
    {
        self.inner
            .handlers
            .on(kind, move |envelope: &Envelope| -> HandlerFuture {
                Box::pin(handler(envelope.clone()))
            })
    }

    /// Like [`on`](Self::on), but removed before its first invocation.
    pub fn once<F, Fut>(&self, kind: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Value>> + Send + 'static,
    {
        self.inner
            .handlers
            .once(kind, move |envelope: &Envelope| -> HandlerFuture {
                Box::pin(handler(envelope.clone()))
            })
    }

    /// Remove one subscription.
    pub fn off(&self, kind: &str, id: HandlerId) -> bool {
        self.inner.handlers.off(kind, id)
    }

    /// Lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the transport is currently open.
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().writer.is_some()
    }

    /// Whether the client has been closed or terminated.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Envelopes waiting for the transport.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Close the transport, discard anything still queued, remove every
    /// handler, and stop reconnecting.
    pub async fn close(&self) {
        let writer = self.inner.shut_state();
        self.inner.handlers.clear();
        if let Some(writer) = writer {
            let _ = writer.send(Message::Close(None));
        }
        self.inner.cancel.cancel();

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Drop the transport immediately without a close handshake.
    pub fn terminate(&self) {
        let _ = self.inner.shut_state();
        self.inner.handlers.clear();
        self.inner.cancel.cancel();

        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            task.abort();
            self.inner.emit(ClientEvent::Closed);
        }
    }
}

#[async_trait]
impl Closeable for ReconnectingClient {
    fn label(&self) -> String {
        format!("client {}", self.inner.source)
    }

    async fn close(&self) {
        ReconnectingClient::close(self).await;
    }
}

impl std::fmt::Debug for ReconnectingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingClient")
            .field("url", &self.inner.url)
            .field("source", &self.inner.source)
            .field("open", &self.is_open())
            .field("queued", &self.queued())
            .finish()
    }
}
