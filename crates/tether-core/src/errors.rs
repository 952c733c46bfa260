//! Gateway error taxonomy shared by the server, client and shutdown crates.

use std::time::Duration;

use crate::envelope::EnvelopeError;

/// Typed error taxonomy for gateway operations.
///
/// None of these abort the process on their own: most are logged and
/// absorbed where they occur. Only [`GatewayError::CleanupHookFailure`]
/// forces a non-graceful shutdown.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // Absorbed at the receiving edge
    /// An inbound frame could not be decoded.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] EnvelopeError),
    /// `send_to` named an identity with no open connection.
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    /// A registry entry missed two consecutive pings.
    #[error("heartbeat timeout for {source_id}")]
    HeartbeatTimeout {
        /// Identity that was evicted.
        source_id: String,
    },

    // Shutdown
    /// A managed resource missed its close deadline.
    #[error("{resource} failed to close within {timeout:?}")]
    ShutdownResourceTimeout {
        /// Resource label, e.g. `server 127.0.0.1:8080`.
        resource: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The async cleanup hook returned an error.
    #[error("cleanup hook failed: {0}")]
    CleanupHookFailure(String),

    // Transport
    /// Connect or I/O failure on a client transport.
    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Whether this error ends the graceful shutdown path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CleanupHookFailure(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::UnknownTarget(_) => "unknown_target",
            Self::HeartbeatTimeout { .. } => "heartbeat_timeout",
            Self::ShutdownResourceTimeout { .. } => "shutdown_resource_timeout",
            Self::CleanupHookFailure(_) => "cleanup_hook_failure",
            Self::Transport(_) => "transport",
        }
    }
}
