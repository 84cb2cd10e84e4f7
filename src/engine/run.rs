//! `Run` — one bounded, re-entrant invocation of the engine for one
//! `TradeInstruction`.
//!
//! Every piece of state that would otherwise be tempting to keep as a
//! process-wide global (the rate-limit timestamp map, the cancellation
//! flag) is a field on this struct instead, constructed fresh in
//! `Run::new` and dropped with the `Run` — this is what makes
//! `Run::execute` safe to call any number of times in the same process.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use reqwest::Client;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::account_state::AccountState;
use crate::engine::cancel::CancellationSource;
use crate::engine::{controller, fill_detector, placement, position_monitor, tpsl_worker};
use crate::model::{Credentials, TradeInstruction};
use crate::signer::RateLimiter;
use crate::summary::RunSummary;
use crate::time_anchor::TimeAnchor;
use crate::venue::{BybitClient, VenueClient};

/// One bounded execution of the engine for one [`TradeInstruction`] across
/// a set of accounts. Nothing here is process-global: the rate limiter's
/// timestamp map and the account-state map are both fresh per `Run` and
/// scoped to its lifetime.
pub struct Run {
    config: Config,
    http: Client,
    credentials: HashMap<String, Credentials>,
    instruction: TradeInstruction,
    rate_limiter: Arc<RateLimiter>,
    cancel_source: Arc<dyn CancellationSource>,
}

impl Run {
    pub fn new(
        config: Config,
        credentials: HashMap<String, Credentials>,
        instruction: TradeInstruction,
        cancel_source: Arc<dyn CancellationSource>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;

        Ok(Self {
            config,
            http,
            credentials,
            instruction,
            rate_limiter: Arc::new(RateLimiter::new()),
            cancel_source,
        })
    }

    /// Runs the full lifecycle: Time Anchor → Placement → (Fill Detector +
    /// TP/SL Worker + Position Monitors) → Controller → Teardown. Always
    /// returns a summary; a `Run` never fails as a whole, only individual
    /// account operations can fail.
    pub async fn execute(self) -> RunSummary {
        for warning in self.instruction.validate() {
            warn!(warning, "trade instruction consistency warning (not rejected)");
        }

        let time_anchor = Arc::new(
            TimeAnchor::resolve(&self.http, &self.config, self.instruction.demo).await,
        );

        let mut venues: HashMap<String, Arc<dyn VenueClient>> = HashMap::new();
        for (name, creds) in &self.credentials {
            let client = BybitClient::new(
                self.http.clone(),
                &self.config,
                self.instruction.demo,
                creds.clone(),
                time_anchor.clone(),
                self.rate_limiter.clone(),
                crate::config::RECV_WINDOW_MS,
            );
            venues.insert(name.clone(), Arc::new(client));
        }

        info!(accounts = venues.len(), symbol = %self.instruction.symbol, "run starting: placement phase");
        execute_engine(venues, self.instruction, self.cancel_source, self.config.worker_join_timeout).await
    }
}

/// The orchestration core shared by [`Run::execute`] and the scenario
/// tests: placement → (fill detector + TP/SL worker + position monitors)
/// → controller → bounded teardown → summary. Parameterized on
/// `VenueClient` trait objects so tests can drive it against
/// [`crate::engine::tests_support::FakeVenueClient`] without any network
/// access, while production wires in `BybitClient` the same way.
pub(crate) async fn execute_engine(
    venues: HashMap<String, Arc<dyn VenueClient>>,
    instruction: TradeInstruction,
    cancel_source: Arc<dyn CancellationSource>,
    join_timeout: std::time::Duration,
) -> RunSummary {
    let mut states: HashMap<String, Arc<Mutex<AccountState>>> = HashMap::new();
    for name in venues.keys() {
        states.insert(name.clone(), Arc::new(Mutex::new(AccountState::new())));
    }

    placement::place_all(&venues, &instruction, &states).await;

    let stop = CancellationToken::new();
    let (fill_tx, fill_rx) = mpsc::channel(256);

    let fill_detector_handle = tokio::spawn(fill_detector::run(
        venues.clone(),
        instruction.symbol.clone(),
        states.clone(),
        fill_tx,
        stop.clone(),
    ));

    let spawned_monitors: Arc<SyncMutex<std::collections::HashSet<String>>> =
        Arc::new(SyncMutex::new(std::collections::HashSet::new()));

    let (monitor_tx, mut monitor_rx) = mpsc::unbounded_channel::<String>();
    let tpsl_handle = {
        let venues = venues.clone();
        let instruction = instruction.clone();
        let states = states.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            tpsl_worker::run(fill_rx, venues, instruction, states, stop, move |account| {
                let _ = monitor_tx.send(account);
            })
            .await;
        })
    };

    // The cancellation-input adapter flips this flag once the user
    // requests cancel; the Controller reads it once per tick.
    let cancel_requested = Arc::new(AtomicBool::new(false));
    let cancel_notify = Arc::new(Notify::new());
    let cancel_listener_handle = {
        let cancel_source = cancel_source.clone();
        let cancel_notify = cancel_notify.clone();
        tokio::spawn(async move {
            cancel_source.watch(&cancel_notify).await;
        })
    };
    let cancel_flag_setter = {
        let cancel_requested = cancel_requested.clone();
        let cancel_notify = cancel_notify.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_notify.notified() => {
                    cancel_requested.store(true, std::sync::atomic::Ordering::SeqCst);
                }
                _ = stop.cancelled() => {}
            }
        })
    };

    // Drain monitor-spawn requests and launch one Position Monitor task
    // per account, tolerating duplicate requests for the same account.
    let monitor_spawner = {
        let venues = venues.clone();
        let symbol = instruction.symbol.clone();
        let states = states.clone();
        let stop = stop.clone();
        let spawned_monitors = spawned_monitors.clone();
        tokio::spawn(async move {
            let mut handles = Vec::new();
            while let Some(account) = monitor_rx.recv().await {
                let already = {
                    let mut guard = spawned_monitors.lock();
                    if guard.contains(&account) {
                        true
                    } else {
                        guard.insert(account.clone());
                        false
                    }
                };
                if already {
                    continue;
                }
                let Some(venue) = venues.get(&account) else { continue };
                let Some(state) = states.get(&account) else { continue };
                handles.push(tokio::spawn(position_monitor::run(
                    account,
                    symbol.clone(),
                    venue.clone(),
                    state.clone(),
                    stop.clone(),
                )));
            }
            handles
        })
    };

    controller::run(venues.clone(), instruction.clone(), states.clone(), cancel_requested.clone(), stop.clone())
        .await;

    // Controller signals global stop on completion; tear everything down
    // with a bounded join timeout.
    let _ = tokio::time::timeout(join_timeout, fill_detector_handle).await;
    let _ = tokio::time::timeout(join_timeout, tpsl_handle).await;
    let _ = tokio::time::timeout(join_timeout, cancel_listener_handle).await;
    let _ = tokio::time::timeout(join_timeout, cancel_flag_setter).await;

    // `tpsl_handle` has already completed by now, dropping its
    // `monitor_tx` sender and closing the channel, so the spawner task
    // below will drain and return promptly.
    if let Ok(Ok(handles)) = tokio::time::timeout(join_timeout, monitor_spawner).await {
        for handle in handles {
            let _ = tokio::time::timeout(join_timeout, handle).await;
        }
    }

    let mut summary = RunSummary::new();
    for (name, state) in &states {
        let guard = state.lock().await;
        summary.insert(name.clone(), guard.to_summary());
    }
    info!(accounts = summary.len(), "run complete");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cancel::NeverCancel;
    use crate::model::{Protection, Side, Tier};
    use rust_decimal_macros::dec;

    fn instruction() -> TradeInstruction {
        TradeInstruction {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            leverage: 5,
            tiers: [
                Tier { qty: dec!(0.01), limit_price: dec!(30000) },
                Tier { qty: dec!(0.01), limit_price: dec!(29500) },
                Tier { qty: dec!(0.01), limit_price: dec!(29000) },
            ],
            protection: [
                Protection { tp: dec!(31000), sl: dec!(29000) },
                Protection { tp: dec!(30500), sl: dec!(28500) },
                Protection { tp: dec!(30000), sl: dec!(28000) },
            ],
            demo: true,
            max_wait_seconds: 0,
        }
    }

    #[test]
    fn run_new_builds_without_touching_the_network() {
        let config = Config {
            demo_host: "https://example.invalid".to_string(),
            production_host: "https://example.invalid".to_string(),
            http_timeout: std::time::Duration::from_secs(1),
            time_sources: vec![],
            worker_join_timeout: std::time::Duration::from_millis(100),
        };
        let credentials = HashMap::from([(
            "acc1".to_string(),
            Credentials {
                name: "acc1".to_string(),
                api_key: "k".to_string(),
                api_secret: "s".to_string(),
            },
        )]);
        let run = Run::new(config, credentials, instruction(), Arc::new(NeverCancel));
        assert!(run.is_ok());
    }
}
