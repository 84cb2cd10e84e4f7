//! Wire-agnostic data model for a single trading `Run`.
//!
//! Types here are the ones shared by every component of the engine
//! (placement, fill detection, TP/SL, position monitoring, the
//! controller). Anything venue-specific lives in `venue.rs`.

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side, shared by the instruction and the wire layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that would reduce/close a position opened with `self`.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Bybit's wire representation ("Buy" / "Sell"), distinct from the
    /// serde rename used for instruction JSON.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

/// One laddered limit order: quantity and limit price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tier {
    pub qty: Decimal,
    pub limit_price: Decimal,
}

/// Take-profit / stop-loss levels attached once a tier fills.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Protection {
    pub tp: Decimal,
    pub sl: Decimal,
}

/// A complete, immutable trade instruction: the input to one `Run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeInstruction {
    pub symbol: String,
    pub side: Side,
    pub leverage: u32,
    /// Exactly three tiers, indexed 1..=3 by position in this array.
    pub tiers: [Tier; 3],
    /// Exactly three protection levels, matching `tiers` by index.
    pub protection: [Protection; 3],
    pub demo: bool,
    pub max_wait_seconds: u64,
}

impl TradeInstruction {
    /// Tier index is 1-based throughout the engine (matches the
    /// `Limit1`/`Limit2`/`Limit3` labels used in logs and summaries).
    pub fn tier(&self, index: u8) -> Option<&Tier> {
        self.tiers.get(index.checked_sub(1)? as usize)
    }

    pub fn protection_for(&self, index: u8) -> Option<&Protection> {
        self.protection.get(index.checked_sub(1)? as usize)
    }

    /// Non-fatal consistency check: sl/tp must sit on the side of
    /// limit_price implied by `side`. The engine never rejects an
    /// instruction on failure here — it only surfaces warnings for the
    /// caller to log, trusting the upstream producer of this instruction.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.leverage < 1 {
            warnings.push("leverage must be >= 1".to_string());
        }
        for (i, (tier, prot)) in self.tiers.iter().zip(self.protection.iter()).enumerate() {
            let n = i + 1;
            if tier.qty <= Decimal::ZERO {
                warnings.push(format!("tier {n}: qty must be > 0"));
            }
            if tier.limit_price <= Decimal::ZERO {
                warnings.push(format!("tier {n}: limit_price must be > 0"));
            }
            let (tp_ok, sl_ok) = match self.side {
                Side::Buy => (prot.tp > tier.limit_price, prot.sl < tier.limit_price),
                Side::Sell => (prot.tp < tier.limit_price, prot.sl > tier.limit_price),
            };
            if !tp_ok {
                warnings.push(format!(
                    "tier {n}: tp {} is not on the profitable side of limit_price {} for {:?}",
                    prot.tp, tier.limit_price, self.side
                ));
            }
            if !sl_ok {
                warnings.push(format!(
                    "tier {n}: sl {} is not on the protective side of limit_price {} for {:?}",
                    prot.sl, tier.limit_price, self.side
                ));
            }
        }
        warnings
    }
}

/// Per-account API credentials. `name` is the stable identifier used in
/// every log line, map key, and the final summary.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("name", &self.name)
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Opaque, engine-assigned identifier used to correlate a placed order
/// with its tier. Venue-assigned order ids are never relied upon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(pub String);

impl ClientOrderId {
    /// `<account>_limit<tier>_<8-hex-random>`.
    pub fn generate(account: &str, tier: u8) -> Self {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 4] = rng.gen();
        let suffix = hex::encode(bytes);
        ClientOrderId(format!("{account}_limit{tier}_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human label for a tier index, used in logs and the final summary:
/// "Limit1", "Limit2", "Limit3".
pub fn tier_label(index: u8) -> String {
    format!("Limit{index}")
}
