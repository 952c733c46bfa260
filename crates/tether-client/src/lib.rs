//! # tether-client
//!
//! WebSocket client that survives transport drops.
//!
//! - Reconnects with exponential backoff and jitter
//! - Queues envelopes sent while disconnected and flushes them in order
//! - Typed `on` / `once` / `off` subscriptions with automatic
//!   `"<type>:response"` replies
//! - Lifecycle events on a broadcast channel

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod queue;
mod transport;

pub use client::ReconnectingClient;
pub use config::ClientConfig;
pub use errors::ClientError;
pub use events::ClientEvent;
pub use queue::Delivery;
pub use transport::Backoff;
