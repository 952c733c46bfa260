//! # tether-server
//!
//! Axum `WebSocket` gateway that keys connections by a client-declared
//! identity.
//!
//! - Connection registry: one entry per `source`, rebound on reconnect
//! - Typed dispatch of inbound envelopes by `type`
//! - Heartbeat monitor: ping every interval, evict after two silent ticks
//! - Targeted (`send_to`) and fan-out (`broadcast`) delivery
//! - Relay routing for peer-to-peer envelope types
//! - `/health` endpoint and graceful close via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod relay;
pub mod server;
pub mod websocket;

pub use config::ServerConfig;
pub use relay::install_relay;
pub use server::{GatewayServer, InboundMessage};
pub use websocket::registry::{ConnectionRegistry, Registration};
