//! Scorer configuration.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tolerance when checking that weights sum to one.
fn weight_epsilon() -> Decimal {
    Decimal::new(1, 4)
}

/// Weights applied to each sub-score. Must sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_confidence_weight")]
    pub confidence: Decimal,
    #[serde(default = "default_reputation_weight")]
    pub reputation: Decimal,
    #[serde(default = "default_technical_weight")]
    pub technical: Decimal,
    #[serde(default = "default_market_condition_weight")]
    pub market_condition: Decimal,
}

fn default_confidence_weight() -> Decimal {
    Decimal::new(40, 2)
}

fn default_reputation_weight() -> Decimal {
    Decimal::new(30, 2)
}

fn default_technical_weight() -> Decimal {
    Decimal::new(20, 2)
}

fn default_market_condition_weight() -> Decimal {
    Decimal::new(10, 2)
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            confidence: default_confidence_weight(),
            reputation: default_reputation_weight(),
            technical: default_technical_weight(),
            market_condition: default_market_condition_weight(),
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> Decimal {
        self.confidence + self.reputation + self.technical + self.market_condition
    }
}

/// Configuration for the opportunity scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    #[serde(default)]
    pub weights: ScoreWeights,
    /// Candidates scoring below this are dropped before the gate.
    #[serde(default = "default_min_score")]
    pub min_score: Decimal,
    /// Reputation in [0, 100] per source id.
    #[serde(default)]
    pub source_reputation: HashMap<String, Decimal>,
    /// Reputation for sources missing from the table.
    #[serde(default = "default_reputation")]
    pub default_reputation: Decimal,
}

fn default_min_score() -> Decimal {
    Decimal::from(60)
}

fn default_reputation() -> Decimal {
    Decimal::from(50)
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            min_score: default_min_score(),
            source_reputation: HashMap::new(),
            default_reputation: default_reputation(),
        }
    }
}

impl ScorerConfig {
    /// Validate configuration values.
    ///
    /// Returns Err if:
    /// - any weight is outside [0, 1]
    /// - weights do not sum to 1
    /// - min_score or a reputation is outside [0, 100]
    pub fn validate(&self) -> Result<(), String> {
        let w = &self.weights;
        for (name, value) in [
            ("confidence", w.confidence),
            ("reputation", w.reputation),
            ("technical", w.technical),
            ("market_condition", w.market_condition),
        ] {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(format!("weight {name} ({value}) must be within [0, 1]"));
            }
        }

        if (w.sum() - Decimal::ONE).abs() > weight_epsilon() {
            return Err(format!("weights must sum to 1, got {}", w.sum()));
        }

        let hundred = Decimal::ONE_HUNDRED;
        if self.min_score < Decimal::ZERO || self.min_score > hundred {
            return Err(format!(
                "min_score ({}) must be within [0, 100]",
                self.min_score
            ));
        }

        if self.default_reputation < Decimal::ZERO || self.default_reputation > hundred {
            return Err(format!(
                "default_reputation ({}) must be within [0, 100]",
                self.default_reputation
            ));
        }

        for (source, rep) in &self.source_reputation {
            if *rep < Decimal::ZERO || *rep > hundred {
                return Err(format!(
                    "reputation for {source} ({rep}) must be within [0, 100]"
                ));
            }
        }

        Ok(())
    }

    /// Reputation for a source. Table keys may arrive lowercased from
    /// layered config, so an exact miss retries in lowercase.
    pub fn reputation_of(&self, source_id: &str) -> Decimal {
        self.source_reputation
            .get(source_id)
            .or_else(|| self.source_reputation.get(&source_id.to_ascii_lowercase()))
            .copied()
            .unwrap_or(self.default_reputation)
    }
}
