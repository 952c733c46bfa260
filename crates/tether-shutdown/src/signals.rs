//! Wiring host termination signals to a coordinator.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::coordinator::{ShutdownCoordinator, ShutdownOutcome};

/// Run `coordinator.shutdown()` when `trigger` resolves.
///
/// The task ends without doing anything if shutdown was started some other
/// way first. Returns `None` in that case.
pub fn watch_termination<F>(
    coordinator: Arc<ShutdownCoordinator>,
    trigger: F,
) -> JoinHandle<Option<ShutdownOutcome>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = coordinator.token();
    tokio::spawn(async move {
        tokio::select! {
            () = trigger => {
                info!("termination signal received");
                Some(coordinator.shutdown().await)
            }
            () = token.cancelled() => None,
        }
    })
}

/// Shut `coordinator` down on SIGINT or (on unix) SIGTERM.
pub fn register_shutdown_handlers(
    coordinator: Arc<ShutdownCoordinator>,
) -> JoinHandle<Option<ShutdownOutcome>> {
    watch_termination(coordinator, terminate_signal())
}

/// Resolves on the first SIGINT or SIGTERM.
///
/// A signal source that cannot be installed is logged and never fires.
pub async fn terminate_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                let _ = stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
