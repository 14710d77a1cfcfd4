//! Opportunity scoring for incoming trade candidates.
//!
//! Each candidate gets a composite score in [0, 100] from four weighted
//! sub-scores (confidence, source reputation, technical alignment, market
//! condition). Candidates under the minimum score are dropped here and never
//! reach the risk gate.

pub mod config;
pub mod error;
pub mod scorer;

pub use config::{ScoreWeights, ScorerConfig};
pub use error::{ScorerError, ScorerResult};
pub use scorer::{OpportunityScorer, Ranking};
