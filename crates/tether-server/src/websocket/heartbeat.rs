//! Heartbeat ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tether_core::GatewayError;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;

/// Shortest tick period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Counters returned when the heartbeat loop stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Ticks processed (the immediate first tick is not counted).
    pub ticks: u64,
    /// Identities evicted over the loop's lifetime.
    pub evicted: usize,
}

/// Run one heartbeat tick against `registry`.
///
/// Evicts entries that did not answer the previous ping, closes their
/// connections, and pings every remaining open connection. Returns the
/// number of evicted identities.
pub fn heartbeat_tick(registry: &ConnectionRegistry) -> usize {
    let sweep = registry.sweep();
    for (source, connection) in &sweep.evicted {
        let err = GatewayError::HeartbeatTimeout {
            source_id: source.clone(),
        };
        warn!(
            source = %source,
            conn_id = %connection.id,
            error_kind = err.error_kind(),
            "evicting unresponsive client"
        );
        let _ = connection.close();
    }
    for connection in &sweep.ping {
        if !connection.ping() {
            debug!(conn_id = %connection.id, "failed to queue ping");
        }
    }
    sweep.evicted.len()
}

/// Ping every registered identity each `interval` until `cancel` fires.
///
/// An entry is evicted at the first tick that finds its liveness flag
/// still clear, so detection takes between one and two intervals.
pub async fn run_heartbeat(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatReport {
    if interval < MIN_INTERVAL {
        warn!(?interval, min = ?MIN_INTERVAL, "heartbeat interval too short, raising");
    }
    let mut ticker = time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    let mut report = HeartbeatReport::default();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                report.ticks += 1;
                report.evicted += heartbeat_tick(&registry);
            }
            () = cancel.cancelled() => {
                debug!(ticks = report.ticks, evicted = report.evicted, "heartbeat stopped");
                return report;
            }
        }
    }
}
