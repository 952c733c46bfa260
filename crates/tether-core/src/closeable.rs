//! The seam between endpoints and the shutdown coordinator.

use async_trait::async_trait;

/// An endpoint that can be closed as part of a coordinated shutdown.
///
/// `close` resolves once the endpoint has finished closing. It may never
/// resolve (e.g. a peer that ignores the close handshake); callers that
/// need a bound wrap it in a timeout.
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Human-readable name used in logs and shutdown reports.
    fn label(&self) -> String;

    /// Close the endpoint.
    async fn close(&self);
}
