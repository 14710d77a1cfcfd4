//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Data unavailable from {feed}: {reason}")]
    DataUnavailable { feed: String, reason: String },

    #[error("Fetch from {feed} timed out after {ms}ms")]
    Timeout { feed: String, ms: u64 },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    pub fn unavailable(feed: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            feed: feed.into(),
            reason: reason.into(),
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
