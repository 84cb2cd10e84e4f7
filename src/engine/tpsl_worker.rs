//! TP/SL Worker.
//!
//! Consumes `FillEvent`s, attaches take-profit/stop-loss to the tier that
//! just filled, and arms the Position Monitor for that account. Runs
//! until the channel closes or `stop` fires; the channel receive uses a
//! 1s timeout so `stop` is still observed while idle.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::POLL_INTERVAL;
use crate::engine::account_state::AccountState;
use crate::engine::fill_detector::FillEvent;
use crate::model::TradeInstruction;
use crate::venue::VenueClient;

/// Returned to the caller so it can decide whether to (re)start a
/// Position Monitor task for the account that was just armed.
pub enum ArmOutcome {
    Armed { account: String },
    NoChange,
}

pub async fn run(
    mut events: mpsc::Receiver<FillEvent>,
    venues: HashMap<String, Arc<dyn VenueClient>>,
    instruction: TradeInstruction,
    states: HashMap<String, Arc<Mutex<AccountState>>>,
    stop: CancellationToken,
    mut on_armed: impl FnMut(String),
) {
    loop {
        let received = tokio::time::timeout(POLL_INTERVAL, events.recv()).await;
        if stop.is_cancelled() {
            return;
        }

        let event = match received {
            Ok(Some(event)) => event,
            Ok(None) => return, // channel closed: placement + detector are gone for good
            Err(_) => continue, // timed out waiting, loop back to re-check stop
        };

        let Some(venue) = venues.get(&event.account) else { continue };
        let Some(state) = states.get(&event.account) else { continue };

        if let ArmOutcome::Armed { account } =
            apply_fill(&event, venue.as_ref(), &instruction, state).await
        {
            on_armed(account);
        }
    }
}

/// Handles exactly one `FillEvent`: dedupes via `processed_fills`, attaches
/// TP/SL for the tier, and marks the account armed on success.
async fn apply_fill(
    event: &FillEvent,
    venue: &dyn VenueClient,
    instruction: &TradeInstruction,
    state: &Mutex<AccountState>,
) -> ArmOutcome {
    let tier = {
        let mut guard = state.lock().await;
        if guard.processed_fills.contains(&event.client_order_id) {
            return ArmOutcome::NoChange;
        }
        guard.processed_fills.insert(event.client_order_id.clone());
        match guard.tier_of(&event.client_order_id) {
            Some(tier) => tier,
            None => {
                warn!(
                    account = %event.account,
                    client_order_id = %event.client_order_id,
                    "fill event for an id with no known tier, dropping"
                );
                return ArmOutcome::NoChange;
            }
        }
    };

    let Some(protection) = instruction.protection_for(tier) else {
        return ArmOutcome::NoChange;
    };

    let ack = match venue
        .set_trading_stop(&instruction.symbol, protection.tp, protection.sl)
        .await
    {
        Ok(ack) => ack,
        Err(err) => {
            warn!(
                account = %event.account, tier, error = %err,
                "set-trading-stop request failed, tier not marked filled"
            );
            return ArmOutcome::NoChange;
        }
    };

    if ack.is_success() {
        let mut guard = state.lock().await;
        guard.filled_tiers.push(tier);
        guard.position_armed = true;
        info!(account = %event.account, tier, "tp/sl attached, tier filled");
        ArmOutcome::Armed { account: event.account.clone() }
    } else if ack.is_benign_duplicate() {
        let mut guard = state.lock().await;
        guard.filled_tiers.push(tier);
        guard.position_armed = true;
        info!(account = %event.account, tier, "tp/sl already correct (idempotent re-apply)");
        ArmOutcome::Armed { account: event.account.clone() }
    } else {
        warn!(
            account = %event.account, tier, ret_code = ack.ret_code, ret_msg = %ack.ret_msg,
            "set-trading-stop rejected, tier not marked filled"
        );
        ArmOutcome::NoChange
    }
}
