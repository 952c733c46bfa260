//! Graceful shutdown coordination.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::{Closeable, GatewayError};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::options::ShutdownOptions;

/// Coordinator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// No shutdown requested yet.
    Idle,
    /// Hooks running or resources closing.
    ShuttingDown,
    /// Every resource was given its chance to close.
    Completed,
    /// The cleanup hook failed.
    Forced,
}

impl ShutdownPhase {
    /// Whether the phase is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Forced)
    }

    /// Process exit status for a terminal phase.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Forced => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ShuttingDown => "shutting_down",
            Self::Completed => "completed",
            Self::Forced => "forced",
        };
        f.write_str(s)
    }
}

/// Published to subscribers when shutdown completes gracefully.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// All resources were closed or timed out.
    Terminated,
}

/// What one shutdown session did.
#[derive(Debug)]
pub struct ShutdownReport {
    /// `Completed` or `Forced`.
    pub phase: ShutdownPhase,
    /// Resource timeouts and hook failures, in no particular order.
    pub failures: Vec<GatewayError>,
    /// Resources that were asked to close.
    pub resources: usize,
    /// Wall time from trigger to the terminal phase.
    pub elapsed: Duration,
}

/// Result of [`ShutdownCoordinator::shutdown`].
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// This call ran the shutdown session.
    Finished(ShutdownReport),
    /// Another call already started it; nothing was done.
    AlreadyInProgress,
}

/// Closes a set of servers and clients under bounded waits.
pub struct ShutdownCoordinator {
    options: ShutdownOptions,
    phase: watch::Sender<ShutdownPhase>,
    signal: broadcast::Sender<ShutdownSignal>,
    token: CancellationToken,
    clients: Mutex<Vec<Arc<dyn Closeable>>>,
    servers: Mutex<Vec<Arc<dyn Closeable>>>,
}

impl ShutdownCoordinator {
    /// Create an idle coordinator.
    pub fn new(options: ShutdownOptions) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Idle);
        let (signal, _) = broadcast::channel(4);
        Self {
            options,
            phase,
            signal,
            token: CancellationToken::new(),
            clients: Mutex::new(Vec::new()),
            servers: Mutex::new(Vec::new()),
        }
    }

    /// Manage a client endpoint.
    pub fn add_client(&self, client: Arc<dyn Closeable>) {
        debug!(resource = %client.label(), "managing client");
        self.clients.lock().push(client);
    }

    /// Manage a server endpoint.
    pub fn add_server(&self, server: Arc<dyn Closeable>) {
        debug!(resource = %server.label(), "managing server");
        self.servers.lock().push(server);
    }

    /// Current phase.
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled as soon as shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Options in effect.
    pub fn options(&self) -> &ShutdownOptions {
        &self.options
    }

    /// Receive [`ShutdownSignal::Terminated`] when shutdown completes.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal.subscribe()
    }

    /// Wait until the coordinator reaches a terminal phase.
    pub async fn wait_for_completion(&self) -> ShutdownPhase {
        let mut rx = self.phase.subscribe();
        rx.wait_for(|phase| phase.is_terminal())
            .await
            .map_or(ShutdownPhase::Forced, |phase| *phase)
    }

    /// Run the shutdown session.
    ///
    /// 1. Enter `ShuttingDown` (a second caller gets `AlreadyInProgress`)
    /// 2. Run the `on_shutdown` hook, then the `cleanup` hook
    /// 3. Close every client and server concurrently, each under `timeout`
    /// 4. Publish `Terminated` on `Completed`; exit if configured
    pub async fn shutdown(&self) -> ShutdownOutcome {
        let mut entered = false;
        let _ = self.phase.send_if_modified(|phase| {
            if *phase == ShutdownPhase::Idle {
                *phase = ShutdownPhase::ShuttingDown;
                entered = true;
            }
            entered
        });
        if !entered {
            debug!(phase = %self.phase(), "shutdown already in progress");
            return ShutdownOutcome::AlreadyInProgress;
        }

        let started = Instant::now();
        self.token.cancel();

        let resources: Vec<Arc<dyn Closeable>> = {
            let clients = self.clients.lock();
            let servers = self.servers.lock();
            clients.iter().chain(servers.iter()).cloned().collect()
        };
        info!(
            resources = resources.len(),
            timeout_ms = self.options.timeout.as_millis(),
            "shutdown started"
        );

        if let Some(hook) = &self.options.on_shutdown {
            hook();
        }

        if let Some(cleanup) = &self.options.cleanup {
            if let Err(e) = cleanup().await {
                let err = GatewayError::CleanupHookFailure(format!("{e:#}"));
                error!(error_kind = err.error_kind(), error = %err, "forcing shutdown");
                return self.finish(ShutdownPhase::Forced, vec![err], 0, started);
            }
            debug!("cleanup hook finished");
        }

        let timeout = self.options.timeout;
        let closes = resources
            .iter()
            .map(|resource| close_within(resource.as_ref(), timeout));
        let failures: Vec<GatewayError> = futures::future::join_all(closes)
            .await
            .into_iter()
            .flatten()
            .collect();

        self.finish(ShutdownPhase::Completed, failures, resources.len(), started)
    }

    fn finish(
        &self,
        phase: ShutdownPhase,
        failures: Vec<GatewayError>,
        resources: usize,
        started: Instant,
    ) -> ShutdownOutcome {
        let elapsed = started.elapsed();
        self.phase.send_modify(|p| *p = phase);

        if phase == ShutdownPhase::Completed {
            info!(
                resources,
                timed_out = failures.len(),
                elapsed_ms = elapsed.as_millis(),
                "shutdown completed"
            );
            let _ = self.signal.send(ShutdownSignal::Terminated);
        } else {
            error!(elapsed_ms = elapsed.as_millis(), "shutdown forced");
        }

        if self.options.exit_process {
            self.options.exit.exit(phase.exit_code());
        }

        ShutdownOutcome::Finished(ShutdownReport {
            phase,
            failures,
            resources,
            elapsed,
        })
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("phase", &self.phase())
            .field("clients", &self.clients.lock().len())
            .field("servers", &self.servers.lock().len())
            .field("options", &self.options)
            .finish()
    }
}

/// Close one resource, reporting a timeout instead of waiting forever.
async fn close_within(resource: &dyn Closeable, timeout: Duration) -> Option<GatewayError> {
    let label = resource.label();
    if tokio::time::timeout(timeout, resource.close()).await.is_ok() {
        debug!(resource = %label, "closed");
        return None;
    }
    let err = GatewayError::ShutdownResourceTimeout {
        resource: label,
        timeout,
    };
    warn!(error_kind = err.error_kind(), error = %err, "resource did not close in time");
    Some(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ProcessExit;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingExit(Mutex<Vec<i32>>);

    impl ProcessExit for RecordingExit {
        fn exit(&self, code: i32) {
            self.0.lock().push(code);
        }
    }

    struct Endpoint {
        name: &'static str,
        closes: AtomicUsize,
        hang: bool,
    }

    impl Endpoint {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                closes: AtomicUsize::new(0),
                hang: false,
            })
        }

        fn hanging(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                closes: AtomicUsize::new(0),
                hang: true,
            })
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Closeable for Endpoint {
        fn label(&self) -> String {
            self.name.into()
        }

        async fn close(&self) {
            let _ = self.closes.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
        }
    }

    fn options(exit: &Arc<RecordingExit>) -> ShutdownOptions {
        ShutdownOptions::default().with_process_exit(exit.clone())
    }

    fn report(outcome: ShutdownOutcome) -> ShutdownReport {
        match outcome {
            ShutdownOutcome::Finished(report) => report,
            ShutdownOutcome::AlreadyInProgress => panic!("expected a finished shutdown"),
        }
    }

    // ── phases ──────────────────────────────────────────────────────

    #[test]
    fn starts_idle() {
        let coord = ShutdownCoordinator::new(ShutdownOptions::default());
        assert_eq!(coord.phase(), ShutdownPhase::Idle);
        assert!(!coord.is_shutting_down());
        assert!(!coord.token().is_cancelled());
    }

    #[test]
    fn phase_exit_codes() {
        assert_eq!(ShutdownPhase::Completed.exit_code(), 0);
        assert_eq!(ShutdownPhase::Forced.exit_code(), 1);
        assert!(ShutdownPhase::Forced.is_terminal());
        assert!(!ShutdownPhase::ShuttingDown.is_terminal());
        assert_eq!(ShutdownPhase::ShuttingDown.to_string(), "shutting_down");
    }

    #[tokio::test]
    async fn closes_every_resource_and_completes() {
        let exit = Arc::new(RecordingExit::default());
        let coord = ShutdownCoordinator::new(options(&exit));
        let client = Endpoint::new("client a");
        let server = Endpoint::new("server 1");
        coord.add_client(client.clone());
        coord.add_server(server.clone());
        let mut signals = coord.subscribe();

        let report = report(coord.shutdown().await);
        assert_eq!(report.phase, ShutdownPhase::Completed);
        assert_eq!(report.resources, 2);
        assert!(report.failures.is_empty());
        assert_eq!(client.closes(), 1);
        assert_eq!(server.closes(), 1);

        assert_eq!(signals.recv().await.unwrap(), ShutdownSignal::Terminated);
        assert_eq!(coord.phase(), ShutdownPhase::Completed);
        assert!(coord.token().is_cancelled());
        assert_eq!(*exit.0.lock(), vec![0]);
    }

    #[tokio::test]
    async fn without_exit_process_the_host_keeps_running() {
        let exit = Arc::new(RecordingExit::default());
        let coord = ShutdownCoordinator::new(options(&exit).with_exit_process(false));
        let _ = report(coord.shutdown().await);
        assert!(exit.0.lock().is_empty());
    }

    // ── idempotence ────────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_double_shutdown_runs_once() {
        let exit = Arc::new(RecordingExit::default());
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = cleanups.clone();
        let coord = ShutdownCoordinator::new(options(&exit).with_cleanup(move || {
            let counter = counter.clone();
            async move {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(())
            }
        }));
        let client = Endpoint::new("client a");
        coord.add_client(client.clone());
        let mut signals = coord.subscribe();

        let (first, second) = tokio::join!(coord.shutdown(), coord.shutdown());
        let outcomes = [first, second];
        let finished = outcomes
            .iter()
            .filter(|o| matches!(o, ShutdownOutcome::Finished(_)))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, ShutdownOutcome::AlreadyInProgress))
            .count();
        assert_eq!((finished, skipped), (1, 1));

        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(client.closes(), 1);
        assert_eq!(signals.recv().await.unwrap(), ShutdownSignal::Terminated);
        assert_matches!(
            signals.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        );
        assert_eq!(*exit.0.lock(), vec![0]);
    }

    #[tokio::test]
    async fn shutdown_after_completion_is_noop() {
        let exit = Arc::new(RecordingExit::default());
        let coord = ShutdownCoordinator::new(options(&exit));
        let _ = report(coord.shutdown().await);
        assert_matches!(coord.shutdown().await, ShutdownOutcome::AlreadyInProgress);
        assert_eq!(*exit.0.lock(), vec![0]);
    }

    // ── timeouts ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn hanging_close_times_out_and_still_completes() {
        let exit = Arc::new(RecordingExit::default());
        let coord = ShutdownCoordinator::new(
            options(&exit).with_timeout(Duration::from_millis(100)),
        );
        let stuck = Endpoint::hanging("client stuck");
        let fine = Endpoint::new("server ok");
        coord.add_client(stuck.clone());
        coord.add_server(fine.clone());
        let mut signals = coord.subscribe();

        let report = report(coord.shutdown().await);
        assert_eq!(report.phase, ShutdownPhase::Completed);
        assert!(report.elapsed >= Duration::from_millis(100));
        assert!(report.elapsed < Duration::from_millis(150));
        assert_eq!(report.failures.len(), 1);
        assert_matches!(
            &report.failures[0],
            GatewayError::ShutdownResourceTimeout { resource, timeout }
                if resource == "client stuck" && *timeout == Duration::from_millis(100)
        );
        assert_eq!(stuck.closes(), 1);
        assert_eq!(fine.closes(), 1);
        assert_eq!(signals.recv().await.unwrap(), ShutdownSignal::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_run_concurrently() {
        let exit = Arc::new(RecordingExit::default());
        let coord = ShutdownCoordinator::new(
            options(&exit).with_timeout(Duration::from_millis(100)),
        );
        for name in ["client a", "client b", "client c"] {
            coord.add_client(Endpoint::hanging(name));
        }

        let report = report(coord.shutdown().await);
        assert_eq!(report.failures.len(), 3);
        assert!(report.elapsed < Duration::from_millis(200));
    }

    // ── hooks ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn cleanup_failure_forces_exit() {
        let exit = Arc::new(RecordingExit::default());
        let coord = ShutdownCoordinator::new(
            options(&exit).with_cleanup(|| async { anyhow::bail!("flush failed") }),
        );
        let client = Endpoint::new("client a");
        coord.add_client(client.clone());
        let mut signals = coord.subscribe();

        let report = report(coord.shutdown().await);
        assert_eq!(report.phase, ShutdownPhase::Forced);
        assert_matches!(
            &report.failures[..],
            [GatewayError::CleanupHookFailure(msg)] if msg.contains("flush failed")
        );
        assert_eq!(client.closes(), 0);
        assert_eq!(coord.phase(), ShutdownPhase::Forced);
        assert_matches!(
            signals.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        );
        assert_eq!(*exit.0.lock(), vec![1]);
    }

    #[tokio::test]
    async fn entry_hook_runs_before_cleanup() {
        let exit = Arc::new(RecordingExit::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        let (o1, o2) = (order.clone(), order.clone());
        let coord = ShutdownCoordinator::new(
            options(&exit)
                .on_shutdown(move || o1.lock().push("on_shutdown"))
                .with_cleanup(move || {
                    let o2 = o2.clone();
                    async move {
                        o2.lock().push("cleanup");
                        Ok(())
                    }
                }),
        );
        let _ = report(coord.shutdown().await);
        assert_eq!(*order.lock(), vec!["on_shutdown", "cleanup"]);
    }

    #[tokio::test]
    async fn wait_for_completion_observes_terminal_phase() {
        let exit = Arc::new(RecordingExit::default());
        let coord = Arc::new(ShutdownCoordinator::new(options(&exit)));
        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.wait_for_completion().await })
        };
        tokio::task::yield_now().await;
        let _ = coord.shutdown().await;
        assert_eq!(waiter.await.unwrap(), ShutdownPhase::Completed);
    }
}
