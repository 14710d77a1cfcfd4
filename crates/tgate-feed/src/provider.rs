//! Collaborator traits for external inputs.

use std::sync::Arc;

use tgate_core::{BoxFuture, HealthSnapshot, MarketSnapshot, TradeCandidate};

use crate::error::FeedResult;

/// Yields the trade candidates for one cycle. An empty batch is normal.
pub trait SignalSource: Send + Sync {
    fn fetch_candidates(&self) -> BoxFuture<'_, FeedResult<Vec<TradeCandidate>>>;

    fn name(&self) -> &'static str;
}

/// Price and positioning data per symbol.
pub trait MarketDataProvider: Send + Sync {
    fn fetch_market<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, FeedResult<MarketSnapshot>>;

    fn name(&self) -> &'static str;
}

/// Health ratio of an externally tracked leveraged position.
pub trait HealthMetricProvider: Send + Sync {
    fn fetch_health(&self) -> BoxFuture<'_, FeedResult<HealthSnapshot>>;

    fn name(&self) -> &'static str;
}

pub type DynSignalSource = Arc<dyn SignalSource>;
pub type DynMarketDataProvider = Arc<dyn MarketDataProvider>;
pub type DynHealthMetricProvider = Arc<dyn HealthMetricProvider>;
