//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_settings::ServerSettings;

/// Configuration for the gateway server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// `source` stamped on envelopes the server originates.
    pub identity: String,
    /// Heartbeat ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound channel capacity.
    pub send_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            identity: "gateway".into(),
            heartbeat_interval_ms: 30_000,
            max_connections: 256,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            send_queue_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Heartbeat interval as a `Duration`, never shorter than 1 ms.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// `host:port` bind string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            identity: settings.identity.clone(),
            heartbeat_interval_ms: settings.heartbeat_interval_ms,
            max_connections: settings.max_connections,
            max_message_size: settings.max_message_size,
            send_queue_capacity: settings.send_queue_capacity,
        }
    }
}
