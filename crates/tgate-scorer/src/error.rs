//! Scorer error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type ScorerResult<T> = Result<T, ScorerError>;
