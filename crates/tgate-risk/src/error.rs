//! Risk error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid kill switch transition: {0}")]
    InvalidTransition(String),
}

pub type RiskResult<T> = Result<T, RiskError>;
