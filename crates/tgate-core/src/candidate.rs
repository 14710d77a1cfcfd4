//! Trade candidates as delivered by the signal source, and their scored form.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::Price;
use crate::error::{CoreError, Result};
use crate::order::Side;

/// Technical confirmations attached to a raw signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalFlags {
    pub trend_aligned: bool,
    pub momentum_aligned: bool,
    pub volume_confirmed: bool,
    pub level_confirmed: bool,
}

impl TechnicalFlags {
    pub const TOTAL: u32 = 4;

    pub fn aligned_count(&self) -> u32 {
        [
            self.trend_aligned,
            self.momentum_aligned,
            self.volume_confirmed,
            self.level_confirmed,
        ]
        .iter()
        .filter(|f| **f)
        .count() as u32
    }
}

/// Raw signal attributes used by the scorer and the ladder planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAttributes {
    /// Signal confidence in [0, 1].
    pub confidence: Decimal,
    /// Identifier of the upstream source, looked up in the reputation table.
    pub source_id: String,
    #[serde(default)]
    pub technical: TechnicalFlags,
    /// Market condition quality in [0, 1].
    #[serde(default = "default_market_condition")]
    pub market_condition: Decimal,
    /// Recent price momentum in percent. Selects the aggressive entry ladder.
    #[serde(default)]
    pub momentum_pct: Decimal,
}

fn default_market_condition() -> Decimal {
    Decimal::new(5, 1)
}

/// A proposed trade. Immutable once scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    /// Proposed notional in quote currency.
    pub notional: Decimal,
    /// Price the entry ladder is anchored to.
    pub reference_price: Price,
    /// Proposed stop distance in percent of entry.
    pub stop_distance_pct: Decimal,
    pub attributes: SignalAttributes,
}

impl TradeCandidate {
    /// Reject structurally unusable candidates before they are scored.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(CoreError::InvalidCandidate(format!(
                "{}: empty symbol",
                self.id
            )));
        }
        if self.notional <= Decimal::ZERO {
            return Err(CoreError::InvalidCandidate(format!(
                "{}: notional must be positive, got {}",
                self.id, self.notional
            )));
        }
        if !self.reference_price.is_positive() {
            return Err(CoreError::InvalidPrice(format!(
                "{}: reference price {}",
                self.id, self.reference_price
            )));
        }
        if self.stop_distance_pct <= Decimal::ZERO {
            return Err(CoreError::InvalidCandidate(format!(
                "{}: stop distance must be positive, got {}",
                self.id, self.stop_distance_pct
            )));
        }
        unit_interval(&self.id, "confidence", self.attributes.confidence)?;
        unit_interval(
            &self.id,
            "market_condition",
            self.attributes.market_condition,
        )?;
        Ok(())
    }
}

fn unit_interval(id: &str, field: &str, value: Decimal) -> Result<()> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(CoreError::InvalidCandidate(format!(
            "{id}: {field} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

/// Sub-scores in [0, 100] that produced a composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub confidence: Decimal,
    pub reputation: Decimal,
    pub technical: Decimal,
    pub market_condition: Decimal,
}

/// A candidate with its composite score. Lives for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: TradeCandidate,
    /// Composite score in [0, 100].
    pub score: Decimal,
    pub components: ScoreComponents,
}

impl ScoredCandidate {
    pub fn id(&self) -> &str {
        &self.candidate.id
    }

    pub fn symbol(&self) -> &str {
        &self.candidate.symbol
    }

    pub fn side(&self) -> Side {
        self.candidate.side
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candidate() -> TradeCandidate {
        TradeCandidate {
            id: "c1".to_string(),
            symbol: "SOL".to_string(),
            side: Side::Long,
            notional: dec!(500),
            reference_price: Price::new(dec!(150)),
            stop_distance_pct: dec!(5),
            attributes: SignalAttributes {
                confidence: dec!(0.8),
                source_id: "desk".to_string(),
                technical: TechnicalFlags::default(),
                market_condition: dec!(0.5),
                momentum_pct: Decimal::ZERO,
            },
        }
    }

    #[test]
    fn test_aligned_count() {
        let flags = TechnicalFlags {
            trend_aligned: true,
            volume_confirmed: true,
            ..Default::default()
        };
        assert_eq!(flags.aligned_count(), 2);
        assert_eq!(TechnicalFlags::default().aligned_count(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(candidate().validate().is_ok());

        let mut c = candidate();
        c.notional = Decimal::ZERO;
        assert!(c.validate().is_err());

        let mut c = candidate();
        c.reference_price = Price::ZERO;
        assert!(c.validate().is_err());

        let mut c = candidate();
        c.symbol.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_unit_attributes() {
        let mut c = candidate();
        c.attributes.confidence = Decimal::ONE;
        c.attributes.market_condition = Decimal::ZERO;
        assert!(c.validate().is_ok());

        let mut c = candidate();
        c.attributes.confidence = Decimal::MAX;
        let err = c.validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidCandidate(_)));
        assert!(err.to_string().contains("confidence"));

        let mut c = candidate();
        c.attributes.confidence = dec!(-0.01);
        assert!(c.validate().is_err());

        let mut c = candidate();
        c.attributes.market_condition = dec!(1.5);
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("market_condition"));
    }

    #[test]
    fn test_attributes_defaults_from_json() {
        let json = r#"{"confidence":"0.7","source_id":"feed-a"}"#;
        let attrs: SignalAttributes = serde_json::from_str(json).unwrap();
        assert_eq!(attrs.market_condition, dec!(0.5));
        assert_eq!(attrs.technical.aligned_count(), 0);
        assert_eq!(attrs.momentum_pct, Decimal::ZERO);
    }
}
