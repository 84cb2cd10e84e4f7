//! Time Anchor — resolves a trusted wall-clock offset once per `Run` and
//! hands out `now_ms()` to every signer for that Run's lifetime.
//!
//! Tries an authoritative time source first (list of candidate servers,
//! first success wins); falls back to the venue's own public-time
//! endpoint (several candidate URLs, several response shapes); if
//! everything fails, offset is zero and a warning is logged. The offset
//! is never re-queried mid-run.

use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::config::{Config, RECV_WINDOW_MS};

#[derive(Debug, Clone)]
pub struct TimeAnchor {
    offset_ms: i64,
}

impl TimeAnchor {
    /// Resolve the offset for a new `Run`. Never fails: on total
    /// unavailability the offset is `0` and a warning is emitted.
    pub async fn resolve(http: &Client, config: &Config, demo: bool) -> Self {
        if let Some(offset) = Self::try_authoritative_sources(http, &config.time_sources).await {
            return Self::finish(offset, config);
        }

        if let Some(offset) = Self::try_venue_time(http, config, demo).await {
            return Self::finish(offset, config);
        }

        warn!("time anchor: no authoritative or venue time source reachable, using offset 0");
        TimeAnchor { offset_ms: 0 }
    }

    fn finish(offset_ms: i64, config: &Config) -> Self {
        if offset_ms.unsigned_abs() > RECV_WINDOW_MS as u64 {
            warn!(
                offset_ms,
                recv_window_ms = RECV_WINDOW_MS,
                "time anchor: resolved offset exceeds the receive window"
            );
        }
        let _ = config;
        TimeAnchor { offset_ms }
    }

    async fn try_authoritative_sources(http: &Client, sources: &[String]) -> Option<i64> {
        for url in sources {
            let before = local_ms();
            let resp = match http.get(url).send().await {
                Ok(r) => r,
                Err(_) => continue,
            };
            let body: Value = match resp.json().await {
                Ok(v) => v,
                Err(_) => continue,
            };
            if let Some(ms) = normalize_authoritative_time(&body) {
                let after = local_ms();
                let local = (before + after) / 2;
                return Some(ms - local);
            }
        }
        None
    }

    async fn try_venue_time(http: &Client, config: &Config, demo: bool) -> Option<i64> {
        let hosts = if demo {
            [config.demo_host.clone(), config.production_host.clone()]
        } else {
            [config.production_host.clone(), config.demo_host.clone()]
        };

        for host in hosts {
            let url = format!("{host}/v5/public/time");
            let before = local_ms();
            let resp = match http.get(&url).send().await {
                Ok(r) => r,
                Err(_) => continue,
            };
            let body: Value = match resp.json().await {
                Ok(v) => v,
                Err(_) => continue,
            };
            if let Some(ms) = normalize_venue_time(&body) {
                let after = local_ms();
                let local = (before + after) / 2;
                return Some(ms - local);
            }
        }
        None
    }

    /// Current authoritative-clock time: the local clock plus the
    /// resolved offset.
    pub fn now_ms(&self) -> i64 {
        local_ms() + self.offset_ms
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Construct directly with a known offset — used by tests.
    #[cfg(test)]
    pub fn with_offset(offset_ms: i64) -> Self {
        TimeAnchor { offset_ms }
    }
}

pub fn local_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

/// Treat a raw numeric timestamp as ms, scaling seconds up if needed:
/// anything under 10^12 is assumed to be seconds, not milliseconds.
fn scale_to_ms(raw: f64) -> i64 {
    if raw < 1_000_000_000_000.0 {
        (raw * 1000.0) as i64
    } else {
        raw as i64
    }
}

fn normalize_authoritative_time(body: &Value) -> Option<i64> {
    // worldtimeapi.org shape: {"unixtime": 1700000000, ...}
    if let Some(unixtime) = body.get("unixtime").and_then(Value::as_f64) {
        return Some(scale_to_ms(unixtime));
    }
    // timeapi.io shape: {"dateTime": "2024-01-01T00:00:00.0000000", ...}
    if let Some(date_time) = body.get("dateTime").and_then(Value::as_str) {
        if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(
            &date_time[..date_time.len().min(26)],
            "%Y-%m-%dT%H:%M:%S%.f",
        ) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    None
}

/// Normalize the handful of response shapes the venue's public-time
/// endpoint has been observed to return.
fn normalize_venue_time(body: &Value) -> Option<i64> {
    // {"result": {"timeSecond": "1700000000", "timeNano": "..."}}
    if let Some(result) = body.get("result") {
        if let Some(sec) = result.get("timeSecond").and_then(value_as_f64) {
            return Some(scale_to_ms(sec));
        }
    }
    // {"time_now": "1700000000.123456"}
    if let Some(raw) = body.get("time_now").and_then(value_as_f64) {
        return Some(scale_to_ms(raw));
    }
    // bare {"time": 1700000000000}
    if let Some(raw) = body.get("time").and_then(value_as_f64) {
        return Some(scale_to_ms(raw));
    }
    None
}

fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn now_ms_applies_offset() {
        let anchor = TimeAnchor::with_offset(5_000);
        let before = local_ms();
        let now = anchor.now_ms();
        assert!(now >= before + 5_000);
        assert!(now < before + 6_000);
    }

    #[test]
    fn zero_offset_tracks_local_clock() {
        let anchor = TimeAnchor::with_offset(0);
        assert!((anchor.now_ms() - local_ms()).abs() < 50);
    }

    #[test]
    fn scale_to_ms_promotes_seconds() {
        assert_eq!(scale_to_ms(1_700_000_000.0), 1_700_000_000_000);
        assert_eq!(scale_to_ms(1_700_000_000_123.0), 1_700_000_000_123);
    }

    #[test]
    fn normalize_authoritative_worldtimeapi_shape() {
        let body = json!({"unixtime": 1_700_000_000, "datetime": "2023-11-14T22:13:20+00:00"});
        assert_eq!(normalize_authoritative_time(&body), Some(1_700_000_000_000));
    }

    #[test]
    fn normalize_venue_result_time_second_shape() {
        let body = json!({"result": {"timeSecond": "1700000000", "timeNano": "123456789"}});
        assert_eq!(normalize_venue_time(&body), Some(1_700_000_000_000));
    }

    #[test]
    fn normalize_venue_bare_time_shape() {
        let body = json!({"time": 1_700_000_000_000_i64});
        assert_eq!(normalize_venue_time(&body), Some(1_700_000_000_000));
    }

    #[test]
    fn normalize_venue_rejects_unknown_shape() {
        let body = json!({"unrelated": "field"});
        assert_eq!(normalize_venue_time(&body), None);
    }
}
