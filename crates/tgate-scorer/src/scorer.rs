//! Composite scoring and threshold filtering.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

use tgate_core::{ScoreComponents, ScoredCandidate, TechnicalFlags, TradeCandidate};

use crate::config::ScorerConfig;
use crate::error::{ScorerError, ScorerResult};

fn clamp_score(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO).min(Decimal::ONE_HUNDRED)
}

/// Scale a [0, 1] attribute to [0, 100], clamping first so any input is safe
/// to multiply.
fn unit_score(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO).min(Decimal::ONE) * Decimal::ONE_HUNDRED
}

/// Outcome of scoring one cycle's batch.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    /// Candidates at or above the minimum score, best first.
    pub survivors: Vec<ScoredCandidate>,
    /// Candidates that were scored (valid input).
    pub scored: usize,
    /// Candidates scored below the minimum.
    pub below_threshold: usize,
    /// Candidates dropped as structurally invalid.
    pub invalid: usize,
}

/// Opportunity scorer.
pub struct OpportunityScorer {
    config: ScorerConfig,
}

impl OpportunityScorer {
    /// Create a scorer. Fails on invalid weights or thresholds.
    pub fn new(config: ScorerConfig) -> ScorerResult<Self> {
        config.validate().map_err(ScorerError::ConfigError)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Score one candidate. Never filters.
    pub fn score(&self, candidate: TradeCandidate) -> ScoredCandidate {
        let attrs = &candidate.attributes;
        let hundred = Decimal::ONE_HUNDRED;

        let components = ScoreComponents {
            confidence: unit_score(attrs.confidence),
            reputation: clamp_score(self.config.reputation_of(&attrs.source_id)),
            technical: clamp_score(
                Decimal::from(attrs.technical.aligned_count()) * hundred
                    / Decimal::from(TechnicalFlags::TOTAL),
            ),
            market_condition: unit_score(attrs.market_condition),
        };

        let w = &self.config.weights;
        let score = clamp_score(
            components.confidence * w.confidence
                + components.reputation * w.reputation
                + components.technical * w.technical
                + components.market_condition * w.market_condition,
        );

        trace!(
            candidate = %candidate.id,
            symbol = %candidate.symbol,
            score = %score,
            confidence = %components.confidence,
            reputation = %components.reputation,
            technical = %components.technical,
            market = %components.market_condition,
            "Candidate scored"
        );

        ScoredCandidate {
            candidate,
            score,
            components,
        }
    }

    /// Whether a score clears the pre-filter.
    pub fn passes(&self, score: Decimal) -> bool {
        score >= self.config.min_score
    }

    /// Score a batch, drop invalid and low-scoring candidates, and sort the
    /// rest by score descending (ties by candidate id).
    pub fn rank(&self, candidates: Vec<TradeCandidate>) -> Ranking {
        let mut ranking = Ranking::default();

        for candidate in candidates {
            if let Err(e) = candidate.validate() {
                warn!(error = %e, "Dropping invalid candidate");
                ranking.invalid += 1;
                continue;
            }

            let scored = self.score(candidate);
            ranking.scored += 1;

            if self.passes(scored.score) {
                ranking.survivors.push(scored);
            } else {
                debug!(
                    candidate = %scored.id(),
                    score = %scored.score,
                    min_score = %self.config.min_score,
                    "Below minimum score"
                );
                ranking.below_threshold += 1;
            }
        }

        ranking.survivors.sort_by(|a, b| match b.score.cmp(&a.score) {
            Ordering::Equal => a.id().cmp(b.id()),
            other => other,
        });

        ranking
    }
}
