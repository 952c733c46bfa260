//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A frame queued for the connection's write task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded envelope.
    Text(Arc<str>),
    /// Heartbeat ping.
    Ping,
    /// Close handshake; the write task stops after sending it.
    Close,
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID (`conn_<uuid>`).
    pub id: String,
    /// Last identity that spoke on this connection.
    source: Mutex<Option<String>>,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Outbound>,
    /// Cancelled once the connection stops accepting frames.
    closing: CancellationToken,
    /// When this connection was established.
    connected_at: Instant,
    /// Count of messages dropped due to full channel.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: String, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            source: Mutex::new(None),
            tx,
            closing: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Record the identity that last sent an envelope here.
    pub fn bind_source(&self, source: &str) {
        let mut current = self.source.lock();
        if current.as_deref() != Some(source) {
            *current = Some(source.to_owned());
        }
    }

    /// Identity bound to this connection, if any envelope arrived yet.
    pub fn source(&self) -> Option<String> {
        self.source.lock().clone()
    }

    /// Whether the connection still accepts frames.
    pub fn is_open(&self) -> bool {
        !self.closing.is_cancelled()
    }

    /// Queue an encoded envelope.
    ///
    /// Returns `false` if the connection is closed or the channel is full;
    /// a full channel also increments the dropped message counter.
    pub fn send(&self, text: Arc<str>) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.tx.try_send(Outbound::Text(text)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a heartbeat Ping frame.
    pub fn ping(&self) -> bool {
        self.is_open() && self.tx.try_send(Outbound::Ping).is_ok()
    }

    /// Queue a Close frame and stop accepting further frames.
    ///
    /// Returns `false` if the connection was already closed.
    pub fn close(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        let _ = self.tx.try_send(Outbound::Close);
        self.closing.cancel();
        true
    }

    /// Mark closed without queueing a Close frame (peer went away).
    pub fn mark_closed(&self) {
        self.closing.cancel();
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closing.cancelled().await;
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("source", &self.source())
            .field("open", &self.is_open())
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}
