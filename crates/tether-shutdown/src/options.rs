//! Shutdown coordinator options and the process-exit capability.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tether_settings::ShutdownSettings;

/// Default per-resource close deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Boxed future returned by a cleanup hook.
pub type CleanupFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type CleanupHook = Arc<dyn Fn() -> CleanupFuture + Send + Sync>;
type EntryHook = Arc<dyn Fn() + Send + Sync>;

/// Terminates the host process.
///
/// Injected so tests can observe the exit status instead of dying.
pub trait ProcessExit: Send + Sync {
    /// Exit with `code`.
    fn exit(&self, code: i32);
}

/// [`ProcessExit`] backed by [`std::process::exit`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ExitProcess;

impl ProcessExit for ExitProcess {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// How a [`ShutdownCoordinator`](crate::ShutdownCoordinator) behaves.
#[derive(Clone)]
pub struct ShutdownOptions {
    /// Deadline applied to each resource's `close` individually.
    pub timeout: Duration,
    /// Terminate the host process once shutdown finishes.
    pub exit_process: bool,
    pub(crate) cleanup: Option<CleanupHook>,
    pub(crate) on_shutdown: Option<EntryHook>,
    pub(crate) exit: Arc<dyn ProcessExit>,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            exit_process: true,
            cleanup: None,
            on_shutdown: None,
            exit: Arc::new(ExitProcess),
        }
    }
}

impl ShutdownOptions {
    /// Set the per-resource close deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether to terminate the host process at the end.
    #[must_use]
    pub fn with_exit_process(mut self, exit_process: bool) -> Self {
        self.exit_process = exit_process;
        self
    }

    /// Async hook run before any resource is closed. An error forces the
    /// shutdown.
    #[must_use]
    pub fn with_cleanup<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.cleanup = Some(Arc::new(move || -> CleanupFuture { Box::pin(hook()) }));
        self
    }

    /// Sync hook run first, as soon as shutdown begins.
    #[must_use]
    pub fn on_shutdown<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_shutdown = Some(Arc::new(hook));
        self
    }

    /// Replace the process-exit capability.
    #[must_use]
    pub fn with_process_exit(mut self, exit: Arc<dyn ProcessExit>) -> Self {
        self.exit = exit;
        self
    }
}

impl From<&ShutdownSettings> for ShutdownOptions {
    fn from(settings: &ShutdownSettings) -> Self {
        Self::default()
            .with_timeout(Duration::from_millis(settings.timeout_ms))
            .with_exit_process(settings.exit_process)
    }
}

impl std::fmt::Debug for ShutdownOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownOptions")
            .field("timeout", &self.timeout)
            .field("exit_process", &self.exit_process)
            .field("cleanup", &self.cleanup.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .finish_non_exhaustive()
    }
}
