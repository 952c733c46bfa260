//! Reconnect and connect-timeout configuration.

use std::time::Duration;

use tether_settings::ClientSettings;

/// Configuration for a [`ReconnectingClient`](crate::ReconnectingClient).
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Delay before the first reconnect attempt (before jitter).
    pub min_reconnect_delay: Duration,
    /// Upper bound on any reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Multiplier applied per consecutive failed attempt.
    pub growth_factor: f64,
    /// Upper bound of the random extra added to the base delay.
    pub jitter: Duration,
    /// How long a single connect attempt may take.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            min_reconnect_delay: Duration::from_millis(settings.min_reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(settings.max_reconnect_delay_ms),
            growth_factor: settings.reconnect_growth_factor,
            jitter: Duration::from_millis(settings.reconnect_jitter_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}

impl ClientConfig {
    /// Fixed short delays without jitter. Handy for local tools and tests.
    pub fn fast() -> Self {
        Self {
            min_reconnect_delay: Duration::from_millis(50),
            max_reconnect_delay: Duration::from_millis(500),
            growth_factor: 1.5,
            jitter: Duration::ZERO,
            connect_timeout: Duration::from_secs(2),
        }
    }
}
