//! Per-account state and the `Run`-scoped map that holds it.

use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

use crate::model::ClientOrderId;
use crate::summary::AccountSummary;

#[derive(Debug, Clone)]
pub struct AccountState {
    pub placed: Vec<ClientOrderId>,
    pub link_to_tier: HashMap<ClientOrderId, u8>,
    pub pending: HashSet<ClientOrderId>,
    pub processed_fills: HashSet<ClientOrderId>,
    pub filled_tiers: Vec<u8>,
    pub canceled: Vec<ClientOrderId>,
    pub position_armed: bool,
    pub placed_at: Instant,
    pub done: bool,
    pub timeout: bool,
    pub user_cancel: bool,
}

impl AccountState {
    pub fn new() -> Self {
        Self {
            placed: Vec::new(),
            link_to_tier: HashMap::new(),
            pending: HashSet::new(),
            processed_fills: HashSet::new(),
            filled_tiers: Vec::new(),
            canceled: Vec::new(),
            position_armed: false,
            placed_at: Instant::now(),
            done: false,
            timeout: false,
            user_cancel: false,
        }
    }

    pub fn record_placed(&mut self, id: ClientOrderId, tier: u8) {
        self.link_to_tier.insert(id.clone(), tier);
        self.pending.insert(id.clone());
        self.placed.push(id);
    }

    pub fn record_canceled(&mut self, id: ClientOrderId) {
        self.pending.remove(&id);
        if !self.canceled.contains(&id) {
            self.canceled.push(id);
        }
    }

    pub fn tier_of(&self, id: &ClientOrderId) -> Option<u8> {
        self.link_to_tier.get(id).copied()
    }

    pub fn to_summary(&self) -> AccountSummary {
        let mut filled_tiers_sorted: Vec<u8> = Vec::new();
        for tier in &self.filled_tiers {
            if !filled_tiers_sorted.contains(tier) {
                filled_tiers_sorted.push(*tier);
            }
        }
        AccountSummary {
            filled: filled_tiers_sorted
                .into_iter()
                .map(crate::model::tier_label)
                .collect(),
            canceled: self.canceled.iter().map(|id| id.to_string()).collect(),
            timeout: self.timeout,
            done: self.done,
            user_cancel: self.user_cancel,
        }
    }
}

impl Default for AccountState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_placed_updates_all_three_fields() {
        let mut state = AccountState::new();
        let id = ClientOrderId::generate("acc1", 1);
        state.record_placed(id.clone(), 1);
        assert_eq!(state.placed, vec![id.clone()]);
        assert_eq!(state.tier_of(&id), Some(1));
        assert!(state.pending.contains(&id));
    }

    #[test]
    fn record_canceled_is_idempotent() {
        let mut state = AccountState::new();
        let id = ClientOrderId::generate("acc1", 1);
        state.record_placed(id.clone(), 1);
        state.record_canceled(id.clone());
        state.record_canceled(id.clone());
        assert_eq!(state.canceled.len(), 1);
        assert!(!state.pending.contains(&id));
    }

    #[test]
    fn summary_lists_filled_tiers_in_first_seen_order_without_duplicates() {
        let mut state = AccountState::new();
        state.filled_tiers = vec![2, 1, 2];
        let summary = state.to_summary();
        assert_eq!(summary.filled, vec!["Limit2", "Limit1"]);
    }
}
