//! Placement Phase.
//!
//! For each account, concurrently with every other account: set leverage,
//! then submit the three laddered limit orders in tier order, pausing
//! briefly between tiers. A placement failure on one tier never aborts the
//! account; other tiers are still attempted and recorded.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::INTER_TIER_PAUSE;
use crate::engine::account_state::AccountState;
use crate::model::{ClientOrderId, TradeInstruction};
use crate::venue::VenueClient;

/// Places all three tiers for one account. Returns once every tier has
/// either succeeded or failed — it never gives up early.
pub async fn place_for_account(
    account: &str,
    venue: &dyn VenueClient,
    instruction: &TradeInstruction,
    state: &Mutex<AccountState>,
) {
    match venue.set_leverage(&instruction.symbol, instruction.leverage).await {
        Ok(ack) if ack.is_success() => {
            info!(account, leverage = instruction.leverage, "leverage set");
        }
        Ok(ack) => {
            warn!(account, ret_code = ack.ret_code, ret_msg = %ack.ret_msg, "set-leverage rejected");
        }
        Err(err) => {
            warn!(account, error = %err, "set-leverage request failed");
        }
    }

    for tier in 1..=3u8 {
        let Some(spec) = instruction.tier(tier) else { continue };
        let client_order_id = ClientOrderId::generate(account, tier);

        match venue
            .place_limit_order(
                &instruction.symbol,
                instruction.side,
                spec.qty,
                spec.limit_price,
                &client_order_id,
            )
            .await
        {
            Ok(ack) if ack.is_success() => {
                let mut guard = state.lock().await;
                guard.record_placed(client_order_id.clone(), tier);
                info!(account, tier, client_order_id = %client_order_id, "tier placed");
            }
            Ok(ack) => {
                warn!(
                    account, tier, ret_code = ack.ret_code, ret_msg = %ack.ret_msg,
                    "tier placement rejected"
                );
            }
            Err(err) => {
                warn!(account, tier, error = %err, "tier placement request failed");
            }
        }

        if tier < 3 {
            tokio::time::sleep(INTER_TIER_PAUSE).await;
        }
    }
}

/// Runs placement for every account concurrently, serially within each
/// account. Returns once all accounts have finished placing.
pub async fn place_all(
    venues: &HashMap<String, Arc<dyn VenueClient>>,
    instruction: &TradeInstruction,
    states: &HashMap<String, Arc<Mutex<AccountState>>>,
) {
    let mut tasks = Vec::new();
    for (account, venue) in venues {
        let Some(state) = states.get(account) else { continue };
        let account = account.clone();
        let venue = venue.clone();
        let instruction = instruction.clone();
        let state = state.clone();

        tasks.push(tokio::spawn(async move {
            place_for_account(&account, venue.as_ref(), &instruction, state.as_ref()).await;
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests_support::FakeVenueClient;
    use rust_decimal_macros::dec;
    use crate::model::{Protection, Side, Tier};

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
            max_wait_seconds: 300,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn all_three_tiers_recorded_on_success() {
        let venue = FakeVenueClient::new();
        let state = Mutex::new(AccountState::new());
        place_for_account("acc1", &venue, &instruction(), &state).await;

        let guard = state.lock().await;
        assert_eq!(guard.placed.len(), 3);
        assert_eq!(guard.pending.len(), 3);
        assert_eq!(guard.link_to_tier.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_tier_rejection_does_not_abort_the_others() {
        let venue = FakeVenueClient::new();
        venue.reject_placement_for_tier(2).await;
        let state = Mutex::new(AccountState::new());
        place_for_account("acc1", &venue, &instruction(), &state).await;

        let guard = state.lock().await;
        assert_eq!(guard.placed.len(), 2);
        let tiers: Vec<u8> = guard.link_to_tier.values().copied().collect();
        assert!(tiers.contains(&1));
        assert!(tiers.contains(&3));
        assert!(!tiers.contains(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_successful_placements_leaves_empty_state() {
        let venue = FakeVenueClient::new();
        venue.reject_all_placements().await;
        let state = Mutex::new(AccountState::new());
        place_for_account("acc1", &venue, &instruction(), &state).await;

        let guard = state.lock().await;
        assert!(guard.placed.is_empty());
        assert!(guard.pending.is_empty());
    }
}
