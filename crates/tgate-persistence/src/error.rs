//! Persistence error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt state file {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
