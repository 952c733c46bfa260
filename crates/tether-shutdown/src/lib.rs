//! # tether-shutdown
//!
//! Coordinated graceful shutdown for gateway servers and clients.
//!
//! - One shutdown session per coordinator; repeat triggers are no-ops
//! - Sync `on_shutdown` hook, then async `cleanup` hook
//! - Every resource closed concurrently under its own deadline
//! - `Completed` publishes a terminating signal; `Forced` exits non-zero
//! - SIGINT / SIGTERM wiring via [`register_shutdown_handlers`]

#![deny(unsafe_code)]

pub mod coordinator;
pub mod options;
pub mod signals;

pub use coordinator::{
    ShutdownCoordinator, ShutdownOutcome, ShutdownPhase, ShutdownReport, ShutdownSignal,
};
pub use options::{ExitProcess, ProcessExit, ShutdownOptions};
pub use signals::{register_shutdown_handlers, terminate_signal, watch_termination};
