//! Control error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Reset requested while the switch is not HALTED.
    #[error("Kill switch not halted: {0}")]
    NotHalted(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ControlResult<T> = Result<T, ControlError>;
