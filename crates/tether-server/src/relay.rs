//! Peer-to-peer relay routing.
//!
//! For each relayed envelope type, an inbound envelope is forwarded with
//! the sender's identity as `source`:
//! - a string `target` payload field routes it to that identity only;
//! - otherwise it is broadcast to every other open connection.

use std::sync::Arc;

use serde_json::Value;
use tether_core::{Envelope, HandlerId};
use tracing::debug;

use crate::server::{GatewayServer, InboundMessage};
use crate::websocket::registry::ConnectionRegistry;

/// Payload field naming the relay recipient.
pub const TARGET_FIELD: &str = "target";

/// Forward one inbound envelope. Returns the number of recipients.
pub fn relay(registry: &ConnectionRegistry, message: &InboundMessage) -> usize {
    let envelope = Envelope::new(
        message.kind.clone(),
        message.source.clone(),
        message.payload.clone(),
    );
    match message.payload.get(TARGET_FIELD) {
        Some(Value::String(target)) => {
            let delivered = registry.send_to(target, &envelope);
            debug!(kind = %message.kind, source = %message.source, to = %target, delivered, "relayed envelope");
            usize::from(delivered)
        }
        _ => registry.broadcast(&envelope, Some(&message.source)),
    }
}

/// Install relay handlers for `kinds` on `server`.
pub fn install_relay<S: AsRef<str>>(server: &GatewayServer, kinds: &[S]) -> Vec<HandlerId> {
    kinds
        .iter()
        .map(|kind| {
            let registry: Arc<ConnectionRegistry> = Arc::clone(server.registry());
            server.on(kind.as_ref(), move |message| {
                let _ = relay(&registry, message);
            })
        })
        .collect()
}
