//! `GatewayServer`: Axum HTTP + WebSocket gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use parking_lot::Mutex;
use tether_core::{Closeable, Dispatcher, Envelope, HandlerId, Payload};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
pub use crate::websocket::handler::InboundMessage;
use crate::websocket::heartbeat::run_heartbeat;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Identity registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Subscribers for inbound envelopes.
    pub dispatcher: Arc<Dispatcher<InboundMessage>>,
    /// Cancelled when the server closes.
    pub cancel: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Open WebSocket sessions.
    pub active: Arc<watch::Sender<usize>>,
}

impl AppState {
    /// Fresh state for `config`.
    pub fn new(config: ServerConfig) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            dispatcher: Arc::new(Dispatcher::new()),
            cancel: CancellationToken::new(),
            start_time: Instant::now(),
            active: Arc::new(active),
        }
    }

    /// Number of open WebSocket sessions.
    pub fn connection_count(&self) -> usize {
        *self.active.borrow()
    }
}

/// The gateway server.
pub struct GatewayServer {
    state: AppState,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl GatewayServer {
    /// Create a new server. Nothing is bound until [`listen`](Self::listen).
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: AppState::new(config),
            tasks: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind, start serving, and start the heartbeat monitor.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_addr()).await?;
        let local = listener.local_addr()?;
        let router = self.router();

        let cancel = self.state.cancel.clone();
        let serve = tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "gateway server error");
            }
        });

        let registry = self.state.registry.clone();
        let interval = self.state.config.heartbeat_interval();
        let cancel = self.state.cancel.clone();
        let heartbeat = tokio::spawn(async move {
            let report = run_heartbeat(registry, interval, cancel).await;
            debug!(?report, "heartbeat finished");
        });

        self.tasks.lock().extend([serve, heartbeat]);
        *self.local_addr.lock() = Some(local);
        info!(addr = %local, identity = %self.state.config.identity, "gateway listening");
        Ok(local)
    }

    /// Address bound by [`listen`](Self::listen).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Subscribe to inbound envelopes of `kind`.
    pub fn on<F>(&self, kind: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.state.dispatcher.on(kind, handler)
    }

    /// Subscribe to the next inbound envelope of `kind` only.
    pub fn once<F>(&self, kind: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.state.dispatcher.once(kind, handler)
    }

    /// Remove a subscription.
    pub fn off(&self, kind: &str, id: HandlerId) -> bool {
        self.state.dispatcher.off(kind, id)
    }

    /// Send an envelope from this server to `target`.
    ///
    /// Absent or closed targets are skipped silently; returns whether the
    /// envelope was queued.
    pub fn send_to(&self, target: &str, kind: &str, payload: Payload) -> bool {
        let envelope = Envelope::new(kind, self.identity(), payload);
        self.state.registry.send_to(target, &envelope)
    }

    /// Send an envelope from this server to every open connection except
    /// `exclude`. Returns the number of recipients.
    pub fn broadcast(&self, kind: &str, payload: Payload, exclude: Option<&str>) -> usize {
        let envelope = Envelope::new(kind, self.identity(), payload);
        self.state.registry.broadcast(&envelope, exclude)
    }

    /// `source` stamped on server-originated envelopes.
    pub fn identity(&self) -> &str {
        &self.state.config.identity
    }

    /// Identity registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Open WebSocket sessions.
    pub fn connection_count(&self) -> usize {
        self.state.connection_count()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closing(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// Stop accepting connections, close every session, and wait for the
    /// listener, heartbeat, and sessions to finish.
    pub async fn close(&self) {
        self.state.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let _ = futures::future::join_all(tasks).await;

        let mut active = self.state.active.subscribe();
        let _ = active.wait_for(|n| *n == 0).await;
        info!(identity = %self.state.config.identity, "gateway closed");
    }
}

#[async_trait]
impl Closeable for GatewayServer {
    fn label(&self) -> String {
        match self.local_addr() {
            Some(addr) => format!("server {addr}"),
            None => format!("server {}", self.state.config.identity),
        }
    }

    async fn close(&self) {
        GatewayServer::close(self).await;
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.cancel.is_cancelled(),
        state.connection_count(),
        state.registry.len(),
    ))
}

/// GET /ws
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.cancel.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let active = state.connection_count();
    if active >= state.config.max_connections {
        warn!(active, max = state.config.max_connections, "rejecting websocket upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let conn_id = format!("conn_{}", uuid::Uuid::now_v7());
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, conn_id, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn make_server() -> GatewayServer {
        GatewayServer::new(ServerConfig::default())
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.identity(), "gateway");
        assert!(server.registry().is_empty());
        assert!(server.local_addr().is_none());
        assert_eq!(server.label(), "server gateway");
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["identities"], 0);
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let server = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn send_to_unknown_target_is_noop() {
        let server = make_server();
        assert!(!server.send_to("nobody", "ping", Payload::new()));
        assert_eq!(server.broadcast("ping", Payload::new(), None), 0);
    }

    #[test]
    fn on_off_roundtrip() {
        let server = make_server();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = server.on("chat", move |_| {
            let _ = h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(server.off("chat", id));
        assert!(!server.off("chat", id));
    }

    #[tokio::test]
    async fn listen_and_close() {
        let server = make_server();
        let addr = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(server.label().contains(&addr.to_string()));

        tokio::time::timeout(std::time::Duration::from_secs(5), server.close())
            .await
            .unwrap();
        assert!(server.is_closing());
    }

    #[tokio::test]
    async fn close_without_listen_returns() {
        let server = make_server();
        tokio::time::timeout(std::time::Duration::from_secs(1), server.close())
            .await
            .unwrap();
    }
}
