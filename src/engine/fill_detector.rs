//! Fill Detector.
//!
//! Polls each account's open orders, reconciles against `pending`, and
//! escalates orders that vanish from the open-orders view without a known
//! terminal status to the order-history endpoint. Emits `FillEvent`s onto
//! a channel; at-most-once effect is the TP/SL Worker's job, not this
//! component's — the same id may legitimately be emitted twice (once from
//! each branch) and the worker absorbs the duplicate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{POLL_INTERVAL, POLL_SLICE};
use crate::engine::account_state::AccountState;
use crate::model::ClientOrderId;
use crate::venue::VenueClient;

#[derive(Debug, Clone)]
pub struct FillEvent {
    pub account: String,
    pub client_order_id: ClientOrderId,
}

/// Runs until `stop` is signaled. Scans all accounts round-robin, then
/// sleeps ~1s in 100ms slices so `stop` is observed promptly.
pub async fn run(
    venues: HashMap<String, Arc<dyn VenueClient>>,
    symbol: String,
    states: HashMap<String, Arc<Mutex<AccountState>>>,
    events: mpsc::Sender<FillEvent>,
    stop: CancellationToken,
) {
    // Tracks ids already emitted by *this* detector instance, per account,
    // so a terminal status seen on two consecutive scans is not re-emitted.
    let mut locally_seen: HashMap<String, HashSet<ClientOrderId>> = HashMap::new();

    loop {
        for (account, venue) in &venues {
            let Some(state) = states.get(account) else { continue };
            let pending_snapshot: HashSet<ClientOrderId> = {
                let guard = state.lock().await;
                guard.pending.clone()
            };
            if pending_snapshot.is_empty() {
                continue;
            }

            let seen_for_account = locally_seen.entry(account.clone()).or_default();
            let mut seen_in_open_orders: HashSet<ClientOrderId> = HashSet::new();

            match venue.open_orders(&symbol).await {
                Ok(orders) => {
                    for order in orders {
                        let id = ClientOrderId(order.client_order_id.clone());
                        if !pending_snapshot.contains(&id) {
                            continue;
                        }
                        seen_in_open_orders.insert(id.clone());
                        if order.is_terminal_fill() && !seen_for_account.contains(&id) {
                            seen_for_account.insert(id.clone());
                            remove_pending(state, &id).await;
                            let _ = events
                                .send(FillEvent { account: account.clone(), client_order_id: id })
                                .await;
                        }
                    }
                }
                Err(err) => {
                    warn!(account, error = %err, "open-orders fetch failed, will retry next tick");
                    continue;
                }
            }

            let missing: Vec<ClientOrderId> = pending_snapshot
                .difference(&seen_in_open_orders)
                .cloned()
                .collect();

            for id in missing {
                if seen_for_account.contains(&id) {
                    continue;
                }
                match venue.order_history(&symbol, &id).await {
                    Ok(records) => {
                        if records.iter().any(|r| r.is_terminal_fill()) {
                            seen_for_account.insert(id.clone());
                            remove_pending(state, &id).await;
                            let _ = events
                                .send(FillEvent { account: account.clone(), client_order_id: id })
                                .await;
                        }
                    }
                    Err(err) => {
                        debug!(account, client_order_id = %id, error = %err, "history lookup failed, retrying next tick");
                    }
                }
            }
        }

        if stop.is_cancelled() {
            return;
        }
        if !sleep_observing_stop(&stop, POLL_INTERVAL).await {
            return;
        }
    }
}

async fn remove_pending(state: &Mutex<AccountState>, id: &ClientOrderId) {
    let mut guard = state.lock().await;
    guard.pending.remove(id);
}

/// Sleeps `total` in `POLL_SLICE`-sized increments, returning `false` as
/// soon as `stop` fires so callers can exit promptly mid-sleep.
pub async fn sleep_observing_stop(stop: &CancellationToken, total: std::time::Duration) -> bool {
    let mut remaining = total;
    while remaining > std::time::Duration::ZERO {
        if stop.is_cancelled() {
            return false;
        }
        let slice = remaining.min(POLL_SLICE);
        tokio::time::sleep(slice).await;
        remaining = remaining.saturating_sub(slice);
    }
    !stop.is_cancelled()
}
