//! Position Monitor.
//!
//! Armed once a tier fills. Waits for the position to appear, then for it
//! to close, then cancels whatever tiers are still pending and clears
//! `position_armed`. Transient read errors are retried on the next tick
//! and never mistaken for a close.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::POLL_INTERVAL;
use crate::engine::account_state::AccountState;
use crate::engine::fill_detector::sleep_observing_stop;
use crate::venue::VenueClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WaitingForAppear,
    Observing,
    Closing,
}

/// Runs the state machine for one account until the position closes or
/// `stop` fires. Safe to spawn more than once for the same account: it
/// gates itself on `position_armed`, so a racing second spawn exits
/// immediately once the first has already torn the account down.
pub async fn run(
    account: String,
    symbol: String,
    venue: Arc<dyn VenueClient>,
    state: Arc<Mutex<AccountState>>,
    stop: CancellationToken,
) {
    let mut phase = Phase::WaitingForAppear;

    loop {
        if stop.is_cancelled() {
            return;
        }
        if !{ state.lock().await.position_armed } {
            return;
        }

        match venue.positions(&symbol).await {
            Ok(positions) => {
                let size = positions
                    .iter()
                    .map(|p| p.size)
                    .fold(rust_decimal::Decimal::ZERO, |acc, s| acc + s);

                match phase {
                    Phase::WaitingForAppear if size > rust_decimal::Decimal::ZERO => {
                        phase = Phase::Observing;
                        info!(account, "position appeared, observing for close");
                    }
                    Phase::Observing if size == rust_decimal::Decimal::ZERO => {
                        phase = Phase::Closing;
                    }
                    _ => {}
                }
            }
            Err(err) => {
                warn!(account, error = %err, "position read failed, retrying next tick");
            }
        }

        if phase == Phase::Closing {
            close_out(&account, &symbol, venue.as_ref(), &state).await;
            return;
        }

        if !sleep_observing_stop(&stop, POLL_INTERVAL).await {
            return;
        }
    }
}

/// Snapshots still-pending tiers, cancels each one, records into
/// `canceled`, and clears `position_armed`.
async fn close_out(
    account: &str,
    symbol: &str,
    venue: &dyn VenueClient,
    state: &Mutex<AccountState>,
) {
    let pending_snapshot: Vec<_> = {
        let guard = state.lock().await;
        guard.pending.iter().cloned().collect()
    };

    for id in pending_snapshot {
        match venue.cancel_order(symbol, &id).await {
            Ok(ack) if ack.is_success() => {
                info!(account, client_order_id = %id, "canceled leftover tier after position close");
            }
            Ok(ack) => {
                warn!(account, client_order_id = %id, ret_code = ack.ret_code, ret_msg = %ack.ret_msg, "cancel rejected");
            }
            Err(err) => {
                warn!(account, client_order_id = %id, error = %err, "cancel request failed");
            }
        }
        let mut guard = state.lock().await;
        guard.record_canceled(id);
    }

    let mut guard = state.lock().await;
    guard.position_armed = false;
}
