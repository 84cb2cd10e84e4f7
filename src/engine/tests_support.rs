//! In-process `VenueClient` test double: a scriptable fake that
//! implements the same trait the real HTTP client does, so engine tests
//! never touch the network.
//!
//! Only compiled for tests (`#[cfg(test)]` module in `engine/mod.rs`), but
//! lives in its own file because every engine submodule's tests need it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tokio::sync::Mutex;

use crate::model::{ClientOrderId, Side};
use crate::venue::{OrderReport, PositionReport, VenueAck, VenueClient, RET_CODE_ALREADY_CORRECT, RET_CODE_OK};

#[derive(Default)]
struct Inner {
    rejected_placement_tiers: HashSet<u8>,
    reject_all_placements: bool,
    reject_trading_stop: bool,
    trading_stop_already_correct: bool,
    trading_stop_calls: u32,
    market_close_calls: u32,
    position_size: Decimal,
    /// ids the fake reports as `Filled` through the open-orders view.
    open_order_fills: HashSet<String>,
    /// ids the fake reports as `Filled` only through order history, i.e.
    /// never appear in the open-orders view at all (lost-visibility case).
    history_only_fills: HashSet<String>,
    /// all ids ever placed, used so `open_orders` can report the rest as
    /// still resting (`New`) rather than silently omitting them.
    live_orders: HashSet<String>,
    canceled: HashSet<String>,
    /// tiers that should be marked filled (via the open-orders view) the
    /// moment they are placed, so scenario tests don't need to know the
    /// randomly generated `ClientOrderId` ahead of time.
    auto_fill_open_orders_tiers: HashSet<u8>,
    /// same, but the fill is only ever visible via order history (the
    /// lost-visibility race).
    auto_fill_history_only_tiers: HashSet<u8>,
}

/// Scriptable fake venue. Defaults to "every call succeeds, nothing ever
/// fills" so tests only need to configure the behavior they care about.
#[derive(Default)]
pub struct FakeVenueClient {
    inner: Mutex<Inner>,
}

impl FakeVenueClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reject_placement_for_tier(&self, tier: u8) {
        self.inner.lock().await.rejected_placement_tiers.insert(tier);
    }

    pub async fn reject_all_placements(&self) {
        self.inner.lock().await.reject_all_placements = true;
    }

    pub async fn reject_trading_stop(&self) {
        self.inner.lock().await.reject_trading_stop = true;
    }

    pub async fn return_already_correct_for_trading_stop(&self) {
        self.inner.lock().await.trading_stop_already_correct = true;
    }

    pub async fn trading_stop_call_count(&self) -> u32 {
        self.inner.lock().await.trading_stop_calls
    }

    pub async fn market_close_call_count(&self) -> u32 {
        self.inner.lock().await.market_close_calls
    }

    pub async fn set_position_size(&self, size: Decimal) {
        self.inner.lock().await.position_size = size;
    }

    /// Marks `id` as filled and visible through the open-orders poll.
    pub async fn fill_via_open_orders(&self, id: &str) {
        let mut guard = self.inner.lock().await;
        guard.live_orders.insert(id.to_string());
        guard.open_order_fills.insert(id.to_string());
    }

    /// Marks `id` as filled, but only discoverable via order history — it
    /// never shows up in the open-orders view (the lost-visibility race).
    pub async fn fill_via_history_only(&self, id: &str) {
        let mut guard = self.inner.lock().await;
        guard.history_only_fills.insert(id.to_string());
    }

    /// Any tier in `tiers` is marked filled (open-orders view) as soon as
    /// its order is placed, without needing to know the generated id.
    pub async fn auto_fill_tiers(&self, tiers: &[u8]) {
        let mut guard = self.inner.lock().await;
        guard.auto_fill_open_orders_tiers.extend(tiers.iter().copied());
    }

    /// As `auto_fill_tiers`, but the fill is only ever visible through
    /// order history (the lost-visibility race).
    pub async fn auto_fill_tiers_via_history(&self, tiers: &[u8]) {
        let mut guard = self.inner.lock().await;
        guard.auto_fill_history_only_tiers.extend(tiers.iter().copied());
    }

    pub async fn canceled_ids(&self) -> HashSet<String> {
        self.inner.lock().await.canceled.clone()
    }
}

fn tier_of_client_order_id(id: &str) -> Option<u8> {
    id.split("_limit").nth(1)?.split('_').next()?.parse().ok()
}

#[async_trait]
impl VenueClient for FakeVenueClient {
    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> anyhow::Result<VenueAck> {
        Ok(ok_ack())
    }

    async fn place_limit_order(
        &self,
        _symbol: &str,
        _side: Side,
        _qty: Decimal,
        _price: Decimal,
        client_order_id: &ClientOrderId,
    ) -> anyhow::Result<VenueAck> {
        let mut guard = self.inner.lock().await;
        if guard.reject_all_placements {
            return Ok(rejected_ack());
        }
        let tier = tier_of_client_order_id(client_order_id.as_str());
        if let Some(tier) = tier {
            if guard.rejected_placement_tiers.contains(&tier) {
                return Ok(rejected_ack());
            }
        }

        let id = client_order_id.as_str().to_string();
        guard.live_orders.insert(id.clone());
        match tier {
            Some(t) if guard.auto_fill_history_only_tiers.contains(&t) => {
                guard.history_only_fills.insert(id);
            }
            Some(t) if guard.auto_fill_open_orders_tiers.contains(&t) => {
                guard.open_order_fills.insert(id);
            }
            _ => {}
        }
        Ok(ok_ack())
    }

    async fn cancel_order(&self, _symbol: &str, client_order_id: &ClientOrderId) -> anyhow::Result<VenueAck> {
        let mut guard = self.inner.lock().await;
        guard.live_orders.remove(client_order_id.as_str());
        guard.canceled.insert(client_order_id.as_str().to_string());
        Ok(ok_ack())
    }

    async fn set_trading_stop(&self, _symbol: &str, _tp: Decimal, _sl: Decimal) -> anyhow::Result<VenueAck> {
        let mut guard = self.inner.lock().await;
        guard.trading_stop_calls += 1;
        if guard.reject_trading_stop {
            return Ok(rejected_ack());
        }
        if guard.trading_stop_already_correct {
            return Ok(VenueAck { ret_code: RET_CODE_ALREADY_CORRECT, ret_msg: "not modified".to_string() });
        }
        Ok(ok_ack())
    }

    async fn open_orders(&self, _symbol: &str) -> anyhow::Result<Vec<OrderReport>> {
        let guard = self.inner.lock().await;
        let mut reports = Vec::new();
        for id in &guard.live_orders {
            if guard.history_only_fills.contains(id) {
                // Deliberately absent from the open-orders view.
                continue;
            }
            let status = if guard.open_order_fills.contains(id) { "Filled" } else { "New" };
            reports.push(OrderReport { client_order_id: id.clone(), status: status.to_string() });
        }
        Ok(reports)
    }

    async fn order_history(
        &self,
        _symbol: &str,
        client_order_id: &ClientOrderId,
    ) -> anyhow::Result<Vec<OrderReport>> {
        let guard = self.inner.lock().await;
        let id = client_order_id.as_str();
        if guard.history_only_fills.contains(id) || guard.open_order_fills.contains(id) {
            return Ok(vec![OrderReport { client_order_id: id.to_string(), status: "Filled".to_string() }]);
        }
        Ok(Vec::new())
    }

    async fn positions(&self, _symbol: &str) -> anyhow::Result<Vec<PositionReport>> {
        let guard = self.inner.lock().await;
        Ok(vec![PositionReport { size: guard.position_size, side: Some(Side::Buy) }])
    }

    async fn close_position_market(
        &self,
        _symbol: &str,
        _side: Side,
        _qty: Decimal,
        _client_order_id: &ClientOrderId,
    ) -> anyhow::Result<VenueAck> {
        let mut guard = self.inner.lock().await;
        guard.market_close_calls += 1;
        guard.position_size = Decimal::ZERO;
        Ok(ok_ack())
    }
}

fn ok_ack() -> VenueAck {
    VenueAck { ret_code: RET_CODE_OK, ret_msg: String::new() }
}

fn rejected_ack() -> VenueAck {
    VenueAck { ret_code: 10001, ret_msg: "rejected".to_string() }
}
