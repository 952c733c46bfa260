//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a
//! settings file may be partial; missing fields keep their default.

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000, "heartbeatIntervalMs": 15000 },
///   "shutdown": { "timeoutMs": 2000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Gateway server settings.
    pub server: ServerSettings,
    /// Reconnecting client settings.
    pub client: ClientSettings,
    /// Shutdown coordinator settings.
    pub shutdown: ShutdownSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Gateway server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// `source` stamped on server-originated envelopes.
    pub identity: String,
    /// Heartbeat ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound channel capacity.
    pub send_queue_capacity: usize,
    /// Envelope types forwarded by the relay router.
    pub relay_types: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            identity: "gateway".to_string(),
            heartbeat_interval_ms: 30_000,
            max_connections: 256,
            max_message_size: 16 * 1024 * 1024,
            send_queue_capacity: 1024,
            relay_types: vec!["message".to_string()],
        }
    }
}

/// Reconnecting client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Delay before the first reconnect attempt.
    pub min_reconnect_delay_ms: u64,
    /// Upper bound on the reconnect delay.
    pub max_reconnect_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub reconnect_growth_factor: f64,
    /// Random extra delay added to every attempt.
    pub reconnect_jitter_ms: u64,
    /// How long a single connect attempt may take.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            min_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 10_000,
            reconnect_growth_factor: 1.3,
            reconnect_jitter_ms: 4000,
            connect_timeout_ms: 4000,
        }
    }
}

/// Shutdown coordinator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShutdownSettings {
    /// Per-resource close deadline in milliseconds.
    pub timeout_ms: u64,
    /// Exit the process once shutdown finishes.
    pub exit_process: bool,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            exit_process: true,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
