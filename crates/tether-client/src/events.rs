//! Client lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use tether_core::GatewayError;

/// Observable transitions of a [`ReconnectingClient`](crate::ReconnectingClient).
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// The transport opened and the queue was flushed.
    Open,
    /// An open transport dropped.
    Disconnected,
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting {
        /// Consecutive attempt number, starting at 1.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// A connect failure or an undecodable inbound frame.
    Error(Arc<GatewayError>),
    /// The client stopped for good.
    Closed,
}

impl ClientEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Disconnected => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Error(_) => "error",
            Self::Closed => "closed",
        }
    }
}
