//! WebSocket connection management, identity registry, heartbeat, and
//! per-connection session loop.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
