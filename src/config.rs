//! Process-level configuration, loaded from the environment: `.env` first,
//! then `std::env::var` with a parsed default for everything.

use std::time::Duration;

/// Bybit's documented receive window.
pub const RECV_WINDOW_MS: i64 = 600_000;

/// Minimum spacing between requests from the same account.
pub const RATE_LIMIT_SPACING: Duration = Duration::from_secs(1);

/// Cadence the Fill Detector, Position Monitor, and Controller poll at.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Slice size used to make polling loops responsive to a stop signal.
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// Explicit pause between tier placements within one account.
pub const INTER_TIER_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Config {
    pub demo_host: String,
    pub production_host: String,
    pub http_timeout: Duration,
    pub time_sources: Vec<String>,
    pub worker_join_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let demo_host = std::env::var("BYBIT_DEMO_HOST")
            .unwrap_or_else(|_| "https://api-demo.bybit.com".to_string());

        let production_host = std::env::var("BYBIT_PRODUCTION_HOST")
            .unwrap_or_else(|_| "https://api.bybit.com".to_string());

        let http_timeout_secs: u64 = std::env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let time_sources = std::env::var("TIME_SOURCES")
            .unwrap_or_else(|_| {
                "https://worldtimeapi.org/api/timezone/Etc/UTC,\
                 https://timeapi.io/api/time/current/zone?timeZone=UTC"
                    .to_string()
            })
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let worker_join_secs: u64 = std::env::var("WORKER_JOIN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        Self {
            demo_host,
            production_host,
            http_timeout: Duration::from_secs(http_timeout_secs),
            time_sources,
            worker_join_timeout: Duration::from_secs(worker_join_secs),
        }
    }

    pub fn host_for(&self, demo: bool) -> &str {
        if demo {
            &self.demo_host
        } else {
            &self.production_host
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
