//! Self-healing transport: connect, pump frames, back off, repeat.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::client::ClientInner;
use crate::config::ClientConfig;
use crate::events::ClientEvent;

/// Reconnect delay schedule.
///
/// The base delay is `min_reconnect_delay` plus a jitter sampled once per
/// client, so a fleet of clients restarted together spreads out. Attempt
/// `n` waits `base * factor^(n-1)`, capped at `max_reconnect_delay`.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
}

impl Backoff {
    /// Schedule for `config`, with a freshly sampled jitter.
    pub fn new(config: &ClientConfig) -> Self {
        let jitter_ms = u64::try_from(config.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        Self::with_base(
            config.min_reconnect_delay + jitter,
            config.max_reconnect_delay,
            config.growth_factor,
        )
    }

    /// Deterministic schedule.
    pub fn with_base(base: Duration, max: Duration, factor: f64) -> Self {
        Self {
            base: base.min(max),
            max,
            factor: factor.max(1.0),
        }
    }

    /// Delay before consecutive attempt `attempt` (1-based). Attempt 0 is
    /// the initial connect and does not wait.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

enum SessionEnd {
    /// Peer closed or the socket failed.
    Dropped,
    /// The client was closed locally.
    Cancelled,
}

/// Drive the transport until the client is closed.
pub(crate) async fn run(inner: Arc<ClientInner>) {
    let backoff = Backoff::new(&inner.config);
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let delay = backoff.delay(attempt);
            debug!(url = %inner.url, attempt, ?delay, "reconnecting");
            inner.emit(ClientEvent::Reconnecting { attempt, delay });
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = inner.cancel.cancelled() => break,
            }
        }

        let connect =
            tokio::time::timeout(inner.config.connect_timeout, connect_async(inner.url.as_str()));
        let result = tokio::select! {
            result = connect => result,
            () = inner.cancel.cancelled() => break,
        };

        let ws = match result {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                inner.transport_error(format!("connect to {} failed: {e}", inner.url));
                attempt = attempt.saturating_add(1);
                continue;
            }
            Err(_) => {
                inner.transport_error(format!(
                    "connect to {} timed out after {:?}",
                    inner.url, inner.config.connect_timeout
                ));
                attempt = attempt.saturating_add(1);
                continue;
            }
        };

        match pump(&inner, ws).await {
            SessionEnd::Cancelled => break,
            SessionEnd::Dropped => attempt = 1,
        }
    }

    inner.finish();
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Move frames between the socket and the client until either side ends.
async fn pump(inner: &Arc<ClientInner>, ws: WsStream) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let flushed = inner.on_open(tx);
    info!(url = %inner.url, source = %inner.source, flushed, "connected");

    let end = loop {
        tokio::select! {
            biased;
            outbound = rx.recv() => {
                let Some(message) = outbound else { break SessionEnd::Dropped };
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "websocket write failed");
                    break SessionEnd::Dropped;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => inner.handle_text(text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => inner.handle_text(text),
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed connection");
                    break SessionEnd::Dropped;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    inner.transport_error(format!("websocket read failed: {e}"));
                    break SessionEnd::Dropped;
                }
                None => break SessionEnd::Dropped,
            },
            () = inner.cancel.cancelled() => {
                while let Ok(message) = rx.try_recv() {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                break SessionEnd::Cancelled;
            }
        }
    };

    inner.on_disconnect(matches!(end, SessionEnd::Dropped));
    end
}
