//! Venue wire layer.
//!
//! `VenueClient` is the one concrete-client abstraction every component
//! talks to, so a real HTTP-backed implementation (`BybitClient`) and an
//! in-process test double (`FakeVenueClient`, in `engine::tests_support`)
//! share a contract. The response-shape normalizer is kept as a
//! compatibility seam for the handful of list-response shapes this venue
//! has been observed to return across endpoints and API versions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::config::Config;
use crate::model::{ClientOrderId, Credentials, Side};
use crate::signer::Signer;
use crate::time_anchor::TimeAnchor;

/// Bybit success predicate, plus the set-trading-stop idempotence
/// carve-out: re-applying an already-correct TP/SL returns this code
/// instead of 0, and is treated as success.
pub const RET_CODE_OK: i64 = 0;
pub const RET_CODE_ALREADY_CORRECT: i64 = 34040;

/// An order as reported by the open-orders or order-history endpoints.
#[derive(Debug, Clone)]
pub struct OrderReport {
    pub client_order_id: String,
    pub status: String,
}

impl OrderReport {
    pub fn is_terminal_fill(&self) -> bool {
        matches!(self.status.to_lowercase().as_str(), "filled" | "complete" | "closed")
    }
}

/// A reported position.
#[derive(Debug, Clone, Default)]
pub struct PositionReport {
    pub size: Decimal,
    pub side: Option<Side>,
}

/// Outcome of a signed venue call.
#[derive(Debug, Clone)]
pub struct VenueAck {
    pub ret_code: i64,
    pub ret_msg: String,
}

impl VenueAck {
    pub fn is_success(&self) -> bool {
        self.ret_code == RET_CODE_OK
    }

    pub fn is_benign_duplicate(&self) -> bool {
        self.ret_code == RET_CODE_ALREADY_CORRECT
    }
}

/// The one concrete venue contract every component talks to. A real HTTP
/// implementation and an in-process fake both implement this; nothing
/// upstream of it knows or cares which.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<VenueAck>;

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
        client_order_id: &ClientOrderId,
    ) -> Result<VenueAck>;

    async fn cancel_order(&self, symbol: &str, client_order_id: &ClientOrderId) -> Result<VenueAck>;

    async fn set_trading_stop(&self, symbol: &str, tp: Decimal, sl: Decimal) -> Result<VenueAck>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderReport>>;

    async fn order_history(
        &self,
        symbol: &str,
        client_order_id: &ClientOrderId,
    ) -> Result<Vec<OrderReport>>;

    async fn positions(&self, symbol: &str) -> Result<Vec<PositionReport>>;

    async fn close_position_market(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        client_order_id: &ClientOrderId,
    ) -> Result<VenueAck>;
}

/// Real HTTP client for one account against one Bybit host.
pub struct BybitClient {
    http: Client,
    host: String,
    creds: Credentials,
    time: std::sync::Arc<TimeAnchor>,
    limiter: std::sync::Arc<crate::signer::RateLimiter>,
    recv_window_ms: i64,
}

impl BybitClient {
    pub fn new(
        http: Client,
        config: &Config,
        demo: bool,
        creds: Credentials,
        time: std::sync::Arc<TimeAnchor>,
        limiter: std::sync::Arc<crate::signer::RateLimiter>,
        recv_window_ms: i64,
    ) -> Self {
        Self {
            http,
            host: config.host_for(demo).to_string(),
            creds,
            time,
            limiter,
            recv_window_ms,
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.limiter.acquire(&self.creds.name).await;

        let body_json = serde_json::to_string(&body).context("serialize request body")?;
        let signer = Signer::new(&self.creds, self.recv_window_ms);
        let headers = signer.sign(self.time.now_ms(), &body_json);

        let url = format!("{}{}", self.host, path);
        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        for (key, value) in headers.as_pairs() {
            request = request.header(key, value);
        }

        let response = request
            .body(body_json)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;

        parse_venue_response(response).await
    }

    async fn get(&self, path: &str, query: &str) -> Result<Value> {
        self.limiter.acquire(&self.creds.name).await;

        let full_path = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        let signer = Signer::new(&self.creds, self.recv_window_ms);
        let headers = signer.sign(self.time.now_ms(), "");

        let url = format!("{}{}", self.host, full_path);
        let mut request = self.http.get(&url);
        for (key, value) in headers.as_pairs() {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {full_path} failed"))?;

        parse_venue_response(response).await
    }

    fn ack_from(body: &Value) -> VenueAck {
        let ret_code = body.get("retCode").and_then(Value::as_i64).unwrap_or(-1);
        let ret_msg = body
            .get("retMsg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        VenueAck { ret_code, ret_msg }
    }
}

/// Non-JSON responses are wrapped as `{http_status, text}`; successful
/// JSON bodies pass through unchanged.
async fn parse_venue_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<Value>(&text) {
        Ok(v) => Ok(v),
        Err(_) => Ok(json!({ "http_status": status.as_u16(), "text": text })),
    }
}

#[async_trait]
impl VenueClient for BybitClient {
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<VenueAck> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        let resp = self.post("/v5/position/set-leverage", body).await?;
        Ok(Self::ack_from(&resp))
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
        client_order_id: &ClientOrderId,
    ) -> Result<VenueAck> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "side": side.as_wire_str(),
            "orderType": "Limit",
            "qty": qty.to_string(),
            "price": price.to_string(),
            "timeInForce": "GTC",
            "orderLinkId": client_order_id.as_str(),
        });
        let resp = self.post("/v5/order/create", body).await?;
        Ok(Self::ack_from(&resp))
    }

    async fn cancel_order(&self, symbol: &str, client_order_id: &ClientOrderId) -> Result<VenueAck> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "orderLinkId": client_order_id.as_str(),
        });
        let resp = self.post("/v5/order/cancel", body).await?;
        Ok(Self::ack_from(&resp))
    }

    async fn set_trading_stop(&self, symbol: &str, tp: Decimal, sl: Decimal) -> Result<VenueAck> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "takeProfit": tp.to_string(),
            "stopLoss": sl.to_string(),
            "positionIdx": 0,
        });
        let resp = self.post("/v5/position/trading-stop", body).await?;
        Ok(Self::ack_from(&resp))
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderReport>> {
        let query = format!("category=linear&symbol={symbol}");
        let resp = self.get("/v5/order/realtime", &query).await?;
        Ok(normalize_order_list(&resp))
    }

    async fn order_history(
        &self,
        symbol: &str,
        client_order_id: &ClientOrderId,
    ) -> Result<Vec<OrderReport>> {
        let query = format!(
            "category=linear&symbol={symbol}&orderLinkId={}&limit=20",
            client_order_id.as_str()
        );
        let resp = self.get("/v5/order/history", &query).await?;
        Ok(normalize_order_list(&resp))
    }

    async fn positions(&self, symbol: &str) -> Result<Vec<PositionReport>> {
        let query = format!("category=linear&symbol={symbol}");
        let resp = self.get("/v5/position/list", &query).await?;
        Ok(normalize_position_list(&resp))
    }

    async fn close_position_market(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        client_order_id: &ClientOrderId,
    ) -> Result<VenueAck> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "side": side.as_wire_str(),
            "orderType": "Market",
            "qty": qty.to_string(),
            "reduceOnly": true,
            "orderLinkId": client_order_id.as_str(),
        });
        let resp = self.post("/v5/order/create", body).await?;
        Ok(Self::ack_from(&resp))
    }
}

/// Normalizes the list-valued venue response shapes this endpoint has
/// been observed to return: `{result:{list}}`, `{result:{data}}`,
/// `{result:[...]}`, `{data:[...]}`, bare `[...]`.
fn extract_list(body: &Value) -> Vec<Value> {
    if let Some(result) = body.get("result") {
        if let Some(list) = result.get("list").and_then(Value::as_array) {
            return list.clone();
        }
        if let Some(data) = result.get("data").and_then(Value::as_array) {
            return data.clone();
        }
        if let Some(arr) = result.as_array() {
            return arr.clone();
        }
    }
    if let Some(data) = body.get("data").and_then(Value::as_array) {
        return data.clone();
    }
    if let Some(arr) = body.as_array() {
        return arr.clone();
    }
    Vec::new()
}

fn normalize_order_list(body: &Value) -> Vec<OrderReport> {
    extract_list(body)
        .into_iter()
        .filter_map(|entry| {
            let client_order_id = entry
                .get("orderLinkId")
                .and_then(Value::as_str)?
                .to_string();
            let status = entry
                .get("orderStatus")
                .or_else(|| entry.get("status"))
                .or_else(|| entry.get("order_status"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(OrderReport { client_order_id, status })
        })
        .collect()
}

fn normalize_position_list(body: &Value) -> Vec<PositionReport> {
    extract_list(body)
        .into_iter()
        .map(|entry| {
            let size = entry
                .get("size")
                .and_then(value_as_decimal)
                .unwrap_or(Decimal::ZERO);
            let side = match entry.get("side").and_then(Value::as_str) {
                Some("Buy") => Some(Side::Buy),
                Some("Sell") => Some(Side::Sell),
                _ => None,
            };
            PositionReport { size, side }
        })
        .collect()
}

fn value_as_decimal(v: &Value) -> Option<Decimal> {
    if let Some(s) = v.as_str() {
        return s.parse().ok();
    }
    if let Some(f) = v.as_f64() {
        return Decimal::try_from(f).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn normalize_all_five_documented_shapes() {
        let shapes = vec![
            json!({"result": {"list": [{"orderLinkId": "a", "orderStatus": "Filled"}]}}),
            json!({"result": {"data": [{"orderLinkId": "a", "orderStatus": "Filled"}]}}),
            json!({"result": [{"orderLinkId": "a", "orderStatus": "Filled"}]}),
            json!({"data": [{"orderLinkId": "a", "orderStatus": "Filled"}]}),
            json!([{"orderLinkId": "a", "orderStatus": "Filled"}]),
        ];
        for shape in shapes {
            let orders = normalize_order_list(&shape);
            assert_eq!(orders.len(), 1, "shape: {shape}");
            assert_eq!(orders[0].client_order_id, "a");
            assert!(orders[0].is_terminal_fill());
        }
    }

    #[test]
    fn terminal_fill_is_case_insensitive_and_bounded() {
        for status in ["filled", "FILLED", "Complete", "closed"] {
            assert!(OrderReport { client_order_id: "x".into(), status: status.into() }
                .is_terminal_fill());
        }
        for status in ["New", "PartiallyFilled", "Cancelled"] {
            assert!(!OrderReport { client_order_id: "x".into(), status: status.into() }
                .is_terminal_fill());
        }
    }

    #[test]
    fn normalize_position_list_parses_size_and_side() {
        let body = json!({"result": {"list": [{"size": "0.01", "side": "Buy"}]}});
        let positions = normalize_position_list(&body);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, dec!(0.01));
        assert_eq!(positions[0].side, Some(Side::Buy));
    }

    #[test]
    fn ack_success_and_benign_duplicate() {
        let ok = VenueAck { ret_code: 0, ret_msg: String::new() };
        assert!(ok.is_success());
        assert!(!ok.is_benign_duplicate());

        let already = VenueAck { ret_code: 34040, ret_msg: "not modified".into() };
        assert!(!already.is_success());
        assert!(already.is_benign_duplicate());

        let error = VenueAck { ret_code: 10001, ret_msg: "boom".into() };
        assert!(!error.is_success());
        assert!(!error.is_benign_duplicate());
    }
}
