//! Controller — the top-level supervisor.
//!
//! Loops over every account once per tick: honors user-cancel first, then
//! the per-account deadline, then declares an account done once it has
//! nothing left pending and no armed position. Returns once every account
//! is `done`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::POLL_INTERVAL;
use crate::engine::account_state::AccountState;
use crate::engine::fill_detector::sleep_observing_stop;
use crate::model::{ClientOrderId, Side, TradeInstruction};
use crate::venue::VenueClient;

/// Drives the controller loop to completion. `cancel_requested` is
/// advisory and read once per tick, bounding user-cancel latency at
/// roughly one poll interval.
pub async fn run(
    venues: HashMap<String, Arc<dyn VenueClient>>,
    instruction: TradeInstruction,
    states: HashMap<String, Arc<Mutex<AccountState>>>,
    cancel_requested: Arc<std::sync::atomic::AtomicBool>,
    stop: CancellationToken,
) {
    loop {
        let mut all_done = true;

        for (account, state) in &states {
            let Some(venue) = venues.get(account) else { continue };

            let already_done = { state.lock().await.done };
            if already_done {
                continue;
            }

            if cancel_requested.load(std::sync::atomic::Ordering::SeqCst) {
                handle_user_cancel(account, venue.as_ref(), &instruction, state).await;
                continue;
            }

            let (placed_at, max_wait) = {
                let guard = state.lock().await;
                (guard.placed_at, instruction.max_wait_seconds)
            };
            if placed_at.elapsed() > std::time::Duration::from_secs(max_wait) {
                handle_timeout(account, venue.as_ref(), &instruction.symbol, state).await;
                continue;
            }

            let (pending_empty, armed) = {
                let guard = state.lock().await;
                (guard.pending.is_empty(), guard.position_armed)
            };
            if pending_empty && !armed {
                let mut guard = state.lock().await;
                guard.done = true;
                info!(account, "account complete: nothing pending, no armed position");
                continue;
            }

            all_done = false;
        }

        if all_done {
            stop.cancel();
            return;
        }

        if !sleep_observing_stop(&stop, POLL_INTERVAL).await {
            // Global stop was raised by some other path (e.g. teardown);
            // mark every remaining account done so the summary is coherent.
            for state in states.values() {
                let mut guard = state.lock().await;
                guard.done = true;
            }
            return;
        }
    }
}

/// Cancels every still-pending order for the account (a filled tier is no
/// longer live on the venue, so there is nothing to cancel for it — only
/// `pending` ids are attempted), then force-closes any open position with
/// a reduce-only market order of the opposite side. Deliberately
/// asymmetric with timeout: unlike timeout, user-cancel also closes live
/// positions rather than leaving them for the Position Monitor.
async fn handle_user_cancel(
    account: &str,
    venue: &dyn VenueClient,
    instruction: &TradeInstruction,
    state: &Mutex<AccountState>,
) {
    let pending_snapshot: Vec<ClientOrderId> = { state.lock().await.pending.iter().cloned().collect() };
    for id in pending_snapshot {
        cancel_and_record(account, venue, &instruction.symbol, id, state).await;
    }

    match venue.positions(&instruction.symbol).await {
        Ok(positions) => {
            for position in positions.into_iter().filter(|p| p.size > rust_decimal::Decimal::ZERO) {
                let close_side = position.side.unwrap_or(instruction.side).opposite();
                let close_id = ClientOrderId::generate(account, 0);
                match venue
                    .close_position_market(&instruction.symbol, close_side, position.size, &close_id)
                    .await
                {
                    Ok(ack) if ack.is_success() => {
                        info!(account, size = %position.size, "position market-closed on user cancel");
                    }
                    Ok(ack) => {
                        warn!(account, ret_code = ack.ret_code, ret_msg = %ack.ret_msg, "market close rejected");
                    }
                    Err(err) => {
                        warn!(account, error = %err, "market close request failed");
                    }
                }
            }
        }
        Err(err) => {
            warn!(account, error = %err, "position read failed during user-cancel teardown");
        }
    }

    let mut guard = state.lock().await;
    guard.user_cancel = true;
    guard.done = true;
    info!(account, "account done: user cancel");
}

/// Cancels every still-pending order for the account. Does NOT touch open
/// positions — a filled tier with TP/SL attached keeps being managed by
/// the Position Monitor.
async fn handle_timeout(
    account: &str,
    venue: &dyn VenueClient,
    symbol: &str,
    state: &Mutex<AccountState>,
) {
    let pending_snapshot: Vec<ClientOrderId> = { state.lock().await.pending.iter().cloned().collect() };
    for id in pending_snapshot {
        cancel_and_record(account, venue, symbol, id, state).await;
    }

    let mut guard = state.lock().await;
    guard.timeout = true;
    guard.done = true;
    info!(account, "account done: timeout");
}

async fn cancel_and_record(
    account: &str,
    venue: &dyn VenueClient,
    symbol: &str,
    id: ClientOrderId,
    state: &Mutex<AccountState>,
) {
    match venue.cancel_order(symbol, &id).await {
        Ok(ack) if ack.is_success() => {
            info!(account, client_order_id = %id, "order canceled");
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
