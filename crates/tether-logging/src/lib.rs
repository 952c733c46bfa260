//! # tether-logging
//!
//! Installs the global `tracing` subscriber for tether processes.
//!
//! The filter is built from a default level plus per-module overrides;
//! `RUST_LOG`, when set, replaces it entirely. Output is either JSON lines
//! or the human-readable `fmt` format.

#![deny(unsafe_code)]

mod types;

pub use types::LogLevel;

use tether_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logging initialisation errors.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("global tracing subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// Configuration for [`init_logging`].
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Default level for every target.
    pub level: LogLevel,
    /// Per-module overrides, e.g. `("tether_server", LogLevel::Debug)`.
    pub module_levels: Vec<(String, LogLevel)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl From<&LoggingSettings> for LogConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: LogLevel::from_str_lossy(&settings.level),
            module_levels: Vec::new(),
            json: settings.json,
        }
    }
}

impl LogConfig {
    /// The filter directive string, e.g. `info,tether_server=debug`.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.to_string())
            .chain(
                self.module_levels
                    .iter()
                    .map(|(module, level)| format!("{module}={level}")),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}
