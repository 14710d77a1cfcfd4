//! Direction enums and identifiers for positions and tranche orders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Direction of a proposed trade or open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side used to build exposure in this direction.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side used to reduce exposure in this direction.
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    /// +1 for long, -1 for short. Multiplies price moves into P&L.
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

fn short_id(prefix: &str) -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    let uuid_short = &Uuid::new_v4().to_string()[..8];
    format!("{prefix}_{ts}_{uuid_short}")
}

/// Position identifier.
///
/// Format: `pos_{timestamp_ms}_{uuid_short}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(String);

impl PositionId {
    pub fn new() -> Self {
        Self(short_id("pos"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PositionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Client order ID for a single tranche placement.
///
/// Every placement attempt of a tranche reuses the same id, so an adapter
/// that already filled it can deduplicate a retry.
///
/// Format: `tg_{timestamp_ms}_{uuid_short}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new() -> Self {
        Self(short_id("tg"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_order_mapping() {
        assert_eq!(Side::Long.entry_side(), OrderSide::Buy);
        assert_eq!(Side::Long.exit_side(), OrderSide::Sell);
        assert_eq!(Side::Short.entry_side(), OrderSide::Sell);
        assert_eq!(Side::Short.exit_side(), OrderSide::Buy);
        assert_eq!(Side::Short.sign(), Decimal::NEGATIVE_ONE);
    }

    #[test]
    fn test_ids_are_unique_and_prefixed() {
        let a = OrderId::new();
        let b = OrderId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("tg_"));
        assert!(PositionId::new().as_str().starts_with("pos_"));
    }

    #[test]
    fn test_side_serde_lowercase() {
        let json = serde_json::to_string(&Side::Short).unwrap();
        assert_eq!(json, "\"short\"");
        let side: Side = serde_json::from_str("\"long\"").unwrap();
        assert_eq!(side, Side::Long);
    }
}
