//! # tether-core
//!
//! Foundation types shared by the tether server, client, and shutdown
//! coordinator.
//!
//! - [`envelope`]: the flat `{type, source, ...payload}` wire format
//! - [`dispatch`]: typed dispatch table (`on` / `once` / `off` / `emit`)
//! - [`errors`]: the [`GatewayError`] taxonomy used in logs and reports
//! - [`closeable`]: the seam the shutdown coordinator drives

#![deny(unsafe_code)]

pub mod closeable;
pub mod dispatch;
pub mod envelope;
pub mod errors;

pub use closeable::Closeable;
pub use dispatch::{Dispatcher, HandlerId};
pub use envelope::{Envelope, EnvelopeError, Payload, RESERVED_KEYS};
pub use errors::GatewayError;
