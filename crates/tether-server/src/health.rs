//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Whether the gateway is accepting connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving.
    Ok,
    /// `close` has been called; upgrades are refused.
    Closing,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Serving state.
    pub status: HealthStatus,
    /// Seconds since the server was created.
    pub uptime_secs: u64,
    /// Open WebSocket sessions.
    pub connections: usize,
    /// Identities currently in the registry.
    pub identities: usize,
}

/// Snapshot the gateway's counters.
pub fn health_check(
    start_time: Instant,
    closing: bool,
    connections: usize,
    identities: usize,
) -> HealthResponse {
    HealthResponse {
        status: if closing {
            HealthStatus::Closing
        } else {
            HealthStatus::Ok
        },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        identities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn serving_gateway_reports_ok() {
        assert_eq!(health_check(Instant::now(), false, 0, 0).status, HealthStatus::Ok);
    }

    #[test]
    fn closing_gateway_reports_closing() {
        assert_eq!(
            health_check(Instant::now(), true, 3, 2).status,
            HealthStatus::Closing
        );
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now().checked_sub(Duration::from_secs(90)).unwrap();
        assert!(health_check(start, false, 0, 0).uptime_secs >= 89);
    }

    #[test]
    fn json_shape() {
        let body = serde_json::to_value(health_check(Instant::now(), true, 2, 1)).unwrap();
        assert_eq!(body["status"], "closing");
        assert_eq!(body["connections"], 2);
        assert_eq!(body["identities"], 1);
        assert!(body["uptime_secs"].is_u64());
    }
}
