//! Feed configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// JSON Lines inbox of trade candidates, consumed each cycle.
    #[serde(default = "default_signals_path")]
    pub signals_path: PathBuf,
    /// JSON array of market snapshots, one per symbol.
    #[serde(default = "default_market_path")]
    pub market_path: PathBuf,
    /// Health reading file. When unset, no leveraged position is tracked.
    #[serde(default)]
    pub health_path: Option<PathBuf>,
    #[serde(default = "default_market_ttl_secs")]
    pub market_ttl_secs: i64,
    #[serde(default = "default_health_ttl_secs")]
    pub health_ttl_secs: i64,
    /// Per-call timeout for every fetch.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_signals_path() -> PathBuf {
    PathBuf::from("data/inbox/candidates.jsonl")
}

fn default_market_path() -> PathBuf {
    PathBuf::from("data/inbox/market.json")
}

fn default_market_ttl_secs() -> i64 {
    300
}

fn default_health_ttl_secs() -> i64 {
    7_200
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            signals_path: default_signals_path(),
            market_path: default_market_path(),
            health_path: None,
            market_ttl_secs: default_market_ttl_secs(),
            health_ttl_secs: default_health_ttl_secs(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.market_ttl_secs <= 0 || self.health_ttl_secs <= 0 {
            return Err("cache TTLs must be positive".to_string());
        }
        if self.fetch_timeout_ms == 0 {
            return Err("fetch_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}
