//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scorer error: {0}")]
    Scorer(#[from] tgate_scorer::ScorerError),

    #[error("Risk error: {0}")]
    Risk(#[from] tgate_risk::RiskError),

    #[error("Position error: {0}")]
    Position(#[from] tgate_position::PositionError),

    #[error("Executor error: {0}")]
    Executor(#[from] tgate_executor::ExecutorError),

    #[error("Feed error: {0}")]
    Feed(#[from] tgate_feed::FeedError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] tgate_persistence::PersistenceError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tgate_telemetry::TelemetryError),

    #[error("Control error: {0}")]
    Control(#[from] tgate_control::ControlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
