//! Inbound frame handling: decode, register, dispatch.

use std::sync::Arc;

use tether_core::{Envelope, GatewayError, Payload};
use tracing::{debug, info, warn};

use super::connection::ClientConnection;
use super::registry::Registration;
use crate::server::AppState;

/// A decoded envelope handed to server-side subscribers.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Envelope `type`.
    pub kind: String,
    /// Sender identity.
    pub source: String,
    /// Payload fields.
    pub payload: Payload,
    /// Connection the envelope arrived on.
    pub connection_id: String,
}

/// Handle one text frame from `connection`.
///
/// Malformed frames are logged and dropped; they neither register nor
/// evict anything and the session keeps running.
pub fn handle_text(state: &AppState, connection: &Arc<ClientConnection>, text: &str) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            let err = GatewayError::from(e);
            warn!(
                conn_id = %connection.id,
                error_kind = err.error_kind(),
                error = %err,
                "dropping malformed envelope"
            );
            return;
        }
    };

    match state.registry.register(&envelope.source, connection) {
        Registration::Registered => {
            info!(source = %envelope.source, conn_id = %connection.id, "client registered");
        }
        Registration::Rebound => {
            info!(source = %envelope.source, conn_id = %connection.id, "client reconnected");
        }
        Registration::Unchanged => {}
    }
    connection.bind_source(&envelope.source);

    let message = InboundMessage {
        kind: envelope.kind,
        source: envelope.source,
        payload: envelope.payload,
        connection_id: connection.id.clone(),
    };
    let handled = state.dispatcher.emit(&message.kind, &message).len();
    debug!(
        kind = %message.kind,
        source = %message.source,
        handlers = handled,
        "dispatched envelope"
    );
}
