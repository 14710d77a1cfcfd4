//! Ladder configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum number of tiers on either side of a ladder.
pub const MAX_TIERS: usize = 6;

fn fraction_epsilon() -> Decimal {
    Decimal::new(1, 4)
}

/// One tier: an offset from the anchor price and a share of the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Percent offset. Entry offsets are `<= 0` (adverse to the side),
    /// exit offsets are `> 0` (in profit).
    pub offset_pct: Decimal,
    /// Share of the position in (0, 1].
    pub fraction: Decimal,
}

impl TierSpec {
    pub fn new(offset_pct: Decimal, fraction: Decimal) -> Self {
        Self {
            offset_pct,
            fraction,
        }
    }
}

/// Entry and exit tiers for every new position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderConfig {
    #[serde(default = "default_entry_tiers")]
    pub entry_tiers: Vec<TierSpec>,
    /// Fewer, tighter tiers used when momentum is strong.
    #[serde(default = "default_aggressive_entry_tiers")]
    pub aggressive_entry_tiers: Vec<TierSpec>,
    /// Absolute momentum (percent) that selects the aggressive tiers. 0 disables.
    #[serde(default = "default_momentum_threshold_pct")]
    pub momentum_threshold_pct: Decimal,
    #[serde(default = "default_exit_tiers")]
    pub exit_tiers: Vec<TierSpec>,
    /// Pending entries older than this are cancelled.
    #[serde(default = "default_entry_timeout_secs")]
    pub entry_timeout_secs: i64,
}

fn default_entry_tiers() -> Vec<TierSpec> {
    vec![
        TierSpec::new(Decimal::ZERO, Decimal::new(40, 2)),
        TierSpec::new(Decimal::from(-1), Decimal::new(30, 2)),
        TierSpec::new(Decimal::from(-2), Decimal::new(20, 2)),
        TierSpec::new(Decimal::from(-3), Decimal::new(10, 2)),
    ]
}

fn default_aggressive_entry_tiers() -> Vec<TierSpec> {
    vec![
        TierSpec::new(Decimal::ZERO, Decimal::new(70, 2)),
        TierSpec::new(Decimal::new(-5, 1), Decimal::new(30, 2)),
    ]
}

fn default_momentum_threshold_pct() -> Decimal {
    Decimal::from(4)
}

fn default_exit_tiers() -> Vec<TierSpec> {
    vec![
        TierSpec::new(Decimal::from(9), Decimal::new(30, 2)),
        TierSpec::new(Decimal::from(16), Decimal::new(30, 2)),
        TierSpec::new(Decimal::from(27), Decimal::new(25, 2)),
        TierSpec::new(Decimal::from(37), Decimal::new(15, 2)),
    ]
}

fn default_entry_timeout_secs() -> i64 {
    14_400
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            entry_tiers: default_entry_tiers(),
            aggressive_entry_tiers: default_aggressive_entry_tiers(),
            momentum_threshold_pct: default_momentum_threshold_pct(),
            exit_tiers: default_exit_tiers(),
            entry_timeout_secs: default_entry_timeout_secs(),
        }
    }
}

fn validate_tiers(name: &str, tiers: &[TierSpec]) -> Result<(), String> {
    if tiers.is_empty() || tiers.len() > MAX_TIERS {
        return Err(format!(
            "{name}: expected 1..={MAX_TIERS} tiers, got {}",
            tiers.len()
        ));
    }
    for (i, tier) in tiers.iter().enumerate() {
        if tier.fraction <= Decimal::ZERO || tier.fraction > Decimal::ONE {
            return Err(format!(
                "{name}[{i}]: fraction {} must be within (0, 1]",
                tier.fraction
            ));
        }
    }
    let sum: Decimal = tiers.iter().map(|t| t.fraction).sum();
    if (sum - Decimal::ONE).abs() > fraction_epsilon() {
        return Err(format!("{name}: fractions must sum to 1, got {sum}"));
    }
    Ok(())
}

fn validate_entry_offsets(name: &str, tiers: &[TierSpec]) -> Result<(), String> {
    let mut previous = Decimal::ONE;
    for (i, tier) in tiers.iter().enumerate() {
        if tier.offset_pct > Decimal::ZERO {
            return Err(format!(
                "{name}[{i}]: entry offset {} must be <= 0",
                tier.offset_pct
            ));
        }
        if tier.offset_pct >= previous {
            return Err(format!("{name}[{i}]: entry offsets must get deeper"));
        }
        previous = tier.offset_pct;
    }
    Ok(())
}

impl LadderConfig {
    /// Validate configuration values.
    ///
    /// Returns Err if:
    /// - a ladder has no tiers or more than `MAX_TIERS`
    /// - fractions are out of range or do not sum to 1
    /// - entry offsets are positive or not strictly deepening
    /// - exit offsets are not positive and strictly increasing
    pub fn validate(&self) -> Result<(), String> {
        validate_tiers("entry_tiers", &self.entry_tiers)?;
        validate_tiers("aggressive_entry_tiers", &self.aggressive_entry_tiers)?;
        validate_tiers("exit_tiers", &self.exit_tiers)?;
        validate_entry_offsets("entry_tiers", &self.entry_tiers)?;
        validate_entry_offsets("aggressive_entry_tiers", &self.aggressive_entry_tiers)?;

        let mut previous = Decimal::ZERO;
        for (i, tier) in self.exit_tiers.iter().enumerate() {
            if tier.offset_pct <= previous {
                return Err(format!(
                    "exit_tiers[{i}]: offset {} must be positive and above the previous tier",
                    tier.offset_pct
                ));
            }
            previous = tier.offset_pct;
        }

        if self.momentum_threshold_pct < Decimal::ZERO {
            return Err("momentum_threshold_pct must be non-negative".to_string());
        }
        if self.entry_timeout_secs <= 0 {
            return Err("entry_timeout_secs must be positive".to_string());
        }
        Ok(())
    }

    /// Entry tiers to use for a candidate with the given momentum.
    pub fn entry_plan(&self, momentum_pct: Decimal) -> &[TierSpec] {
        if self.momentum_threshold_pct > Decimal::ZERO
            && momentum_pct.abs() >= self.momentum_threshold_pct
        {
            &self.aggressive_entry_tiers
        } else {
            &self.entry_tiers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_ladder_is_valid() {
        let config = LadderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.entry_tiers.len(), 4);
        assert_eq!(config.exit_tiers[0].offset_pct, dec!(9));
    }

    #[test]
    fn test_fraction_sum_enforced() {
        let mut config = LadderConfig::default();
        config.exit_tiers[3].fraction = dec!(0.2);
        let err = config.validate().unwrap_err();
        assert!(err.contains("sum to 1"));
    }

    #[test]
    fn test_tier_count_enforced() {
        let mut config = LadderConfig::default();
        config.entry_tiers = (0..7)
            .map(|i| TierSpec::new(Decimal::from(-i), dec!(1) / dec!(7)))
            .collect();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exit_offsets_must_increase() {
        let mut config = LadderConfig::default();
        config.exit_tiers[2].offset_pct = dec!(12);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_entry_offsets_must_deepen() {
        let mut config = LadderConfig::default();
        config.entry_tiers[1].offset_pct = dec!(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_momentum_selects_aggressive_plan() {
        let config = LadderConfig::default();
        assert_eq!(config.entry_plan(dec!(1.5)).len(), 4);
        assert_eq!(config.entry_plan(dec!(4)).len(), 2);
        assert_eq!(config.entry_plan(dec!(-6)).len(), 2);

        let disabled = LadderConfig {
            momentum_threshold_pct: Decimal::ZERO,
            ..Default::default()
        };
        assert_eq!(disabled.entry_plan(dec!(50)).len(), 4);
    }

    #[test]
    fn test_ladder_from_toml() {
        let config: LadderConfig = toml::from_str(
            r#"
            momentum_threshold_pct = 5
            exit_tiers = [
                { offset_pct = 5, fraction = 0.5 },
                { offset_pct = 10, fraction = 0.5 },
            ]
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.exit_tiers.len(), 2);
        assert_eq!(config.entry_tiers.len(), 4);
    }
}
