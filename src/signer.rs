//! Signer / rate limiter.
//!
//! The canonical string is `timestamp_ms ∥ api_key ∥ recv_window_ms ∥
//! body_json`, HMAC-SHA256 under the account's secret, hex-lowercase.
//! The body bytes signed must be byte-identical to the bytes sent, so
//! callers sign a string they already serialized rather than
//! re-serializing after the fact.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::RATE_LIMIT_SPACING;
use crate::model::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Headers required on every signed request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub api_key: String,
    pub signature: String,
    pub sign_type: &'static str,
    pub timestamp_ms: i64,
    pub recv_window_ms: i64,
}

impl SignedHeaders {
    pub fn as_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-BAPI-API-KEY", self.api_key.clone()),
            ("X-BAPI-SIGN", self.signature.clone()),
            ("X-BAPI-SIGN-TYPE", self.sign_type.to_string()),
            ("X-BAPI-TIMESTAMP", self.timestamp_ms.to_string()),
            ("X-BAPI-RECV-WINDOW", self.recv_window_ms.to_string()),
        ]
    }
}

/// Produces signed requests for one account's credentials.
pub struct Signer<'a> {
    creds: &'a Credentials,
    recv_window_ms: i64,
}

impl<'a> Signer<'a> {
    pub fn new(creds: &'a Credentials, recv_window_ms: i64) -> Self {
        Self { creds, recv_window_ms }
    }

    /// `body_json` must be the exact compact-JSON bytes that will be
    /// sent on the wire (empty string for GET requests).
    pub fn sign(&self, timestamp_ms: i64, body_json: &str) -> SignedHeaders {
        let canonical = format!(
            "{}{}{}{}",
            timestamp_ms, self.creds.api_key, self.recv_window_ms, body_json
        );

        let mut mac = HmacSha256::new_from_slice(self.creds.api_secret.as_bytes())
            .expect("HMAC accepts a key of any length");
        mac.update(canonical.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        SignedHeaders {
            api_key: self.creds.api_key.clone(),
            signature,
            sign_type: "2",
            timestamp_ms,
            recv_window_ms: self.recv_window_ms,
        }
    }
}

/// Per-account minimum request spacing. Owned by the `Run` rather than
/// any process-wide state: a fresh `RateLimiter` is created in
/// `Run::new` and dropped with the Run, so no stale timestamp ever
/// leaks between runs.
#[derive(Default)]
pub struct RateLimiter {
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks the calling task (never the account as a whole) until at
    /// least `RATE_LIMIT_SPACING` has elapsed since the last request from
    /// this account. The map lock is held only long enough to compute and
    /// record the next allowed instant; the sleep happens after it is
    /// released so other accounts are never blocked by this one.
    pub async fn acquire(&self, account: &str) {
        let wait = {
            let mut last_sent = self.last_sent.lock().await;
            let now = Instant::now();
            let next_allowed = match last_sent.get(account) {
                Some(&last) => last + RATE_LIMIT_SPACING,
                None => now,
            };
            let scheduled = next_allowed.max(now);
            last_sent.insert(account.to_string(), scheduled);
            scheduled.saturating_duration_since(now)
        };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}
