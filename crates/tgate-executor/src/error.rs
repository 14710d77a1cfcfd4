//! Executor error types.

use thiserror::Error;

use tgate_position::PositionError;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Venue unavailable: {0}")]
    Unavailable(String),

    #[error("Placement timed out after {0}ms")]
    Timeout(u64),

    #[error("Placement cancelled")]
    Cancelled,

    #[error("Position error: {0}")]
    Position(#[from] PositionError),
}

impl ExecutorError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_) | Self::Rejected(_))
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
