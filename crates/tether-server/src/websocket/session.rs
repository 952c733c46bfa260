//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::connection::{ClientConnection, Outbound};
use super::handler::handle_text;
use crate::server::AppState;

/// How long the write task may take to flush a pending Close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Run a WebSocket session for a connected client.
///
/// 1. Forwards queued outbound frames (envelopes, pings, close) in order
/// 2. Decodes incoming text frames and dispatches them
/// 3. Records Pong frames as heartbeat acknowledgments
/// 4. Closes the socket when the server shuts down or the connection is
///    evicted
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(ws: WebSocket, conn_id: String, state: AppState) {
    let (ws_tx, mut ws_rx) = ws.split();

    let (send_tx, send_rx) = mpsc::channel::<Outbound>(state.config.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));

    state.active.send_modify(|n| *n += 1);
    info!(conn_id, "client connected");

    let mut writer = tokio::spawn(write_loop(ws_tx, send_rx, connection.clone()));

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text(&state, &connection, text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_text(&state, &connection, text),
                    Err(_) => debug!(conn_id, len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Some(Ok(Message::Pong(_))) => state.registry.mark_alive(&connection.id),
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    info!(conn_id, "client sent close frame");
                    break;
                }
                Some(Err(e)) => {
                    debug!(conn_id, error = %e, "websocket read error");
                    break;
                }
                None => break,
            },
            () = state.cancel.cancelled() => {
                let _ = connection.close();
                break;
            }
            () = connection.closed() => break,
        }
    }

    connection.mark_closed();
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(
        conn_id,
        source = ?connection.source(),
        age_ms = connection.age().as_millis(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    state.active.send_modify(|n| *n = n.saturating_sub(1));
}

/// Forward outbound frames to the socket until the connection closes.
///
/// Frames already queued when the connection closes are still flushed,
/// so a Close frame queued by `close()` reaches the peer.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Outbound>,
    connection: Arc<ClientConnection>,
) {
    loop {
        tokio::select! {
            biased;
            frame = send_rx.recv() => {
                let Some(frame) = frame else { break };
                if !write_frame(&mut ws_tx, frame).await {
                    break;
                }
            }
            () = connection.closed() => {
                while let Ok(frame) = send_rx.try_recv() {
                    if !write_frame(&mut ws_tx, frame).await {
                        break;
                    }
                }
                break;
            }
        }
    }
    connection.mark_closed();
}

/// Write one frame. Returns `false` once the writer should stop.
async fn write_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: Outbound) -> bool {
    match frame {
        Outbound::Text(text) => ws_tx.send(Message::Text(text.to_string().into())).await.is_ok(),
        Outbound::Ping => ws_tx.send(Message::Ping(vec![].into())).await.is_ok(),
        Outbound::Close => {
            let frame = CloseFrame {
                code: close_code::NORMAL,
                reason: Utf8Bytes::from_static("closing"),
            };
            let _ = ws_tx.send(Message::Close(Some(frame))).await;
            false
        }
    }
}
