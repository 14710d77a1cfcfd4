//! In-memory providers.
//!
//! Used by tests and by deployments that feed the loop programmatically.
//! Each can be switched into a failing mode to exercise the stale fallback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use tgate_core::{BoxFuture, HealthSnapshot, MarketSnapshot, TradeCandidate};

use crate::error::{FeedError, FeedResult};
use crate::provider::{HealthMetricProvider, MarketDataProvider, SignalSource};

/// Hands out queued batches, one per fetch. Empty once drained.
#[derive(Default)]
pub struct StaticSignalSource {
    batches: Mutex<VecDeque<Vec<TradeCandidate>>>,
    failing: AtomicBool,
}

impl StaticSignalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, batch: Vec<TradeCandidate>) {
        self.batches.lock().push_back(batch);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl SignalSource for StaticSignalSource {
    fn fetch_candidates(&self) -> BoxFuture<'_, FeedResult<Vec<TradeCandidate>>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(FeedError::unavailable(self.name(), "failing"))
        } else {
            Ok(self.batches.lock().pop_front().unwrap_or_default())
        };
        Box::pin(async move { result })
    }

    fn name(&self) -> &'static str {
        "static_signals"
    }
}

/// Market snapshots keyed by symbol.
#[derive(Default)]
pub struct StaticMarketDataProvider {
    snapshots: DashMap<String, MarketSnapshot>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticMarketDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, snapshot: MarketSnapshot) {
        self.snapshots.insert(snapshot.symbol.clone(), snapshot);
    }

    pub fn remove(&self, symbol: &str) {
        self.snapshots.remove(symbol);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of fetches served or failed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MarketDataProvider for StaticMarketDataProvider {
    fn fetch_market<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, FeedResult<MarketSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(FeedError::unavailable(self.name(), "failing"))
        } else {
            self.snapshots
                .get(symbol)
                .map(|s| s.value().clone())
                .ok_or_else(|| FeedError::unavailable(self.name(), format!("no snapshot for {symbol}")))
        };
        Box::pin(async move { result })
    }

    fn name(&self) -> &'static str {
        "static_market"
    }
}

/// A single health reading. [`StaticHealthProvider::untracked`] reports no
/// tracked position.
pub struct StaticHealthProvider {
    snapshot: Mutex<HealthSnapshot>,
    failing: AtomicBool,
}

impl StaticHealthProvider {
    pub fn new(snapshot: HealthSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            failing: AtomicBool::new(false),
        }
    }

    pub fn untracked() -> Self {
        Self::new(HealthSnapshot { ratio: None })
    }

    pub fn set(&self, snapshot: HealthSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl HealthMetricProvider for StaticHealthProvider {
    fn fetch_health(&self) -> BoxFuture<'_, FeedResult<HealthSnapshot>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(FeedError::unavailable(self.name(), "failing"))
        } else {
            Ok(*self.snapshot.lock())
        };
        Box::pin(async move { result })
    }

    fn name(&self) -> &'static str {
        "static_health"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tgate_core::Price;

    #[tokio::test]
    async fn test_static_market_failing_mode() {
        let provider = StaticMarketDataProvider::new();
        provider.set(MarketSnapshot {
            symbol: "BTC".to_string(),
            price: Price::new(dec!(50000)),
            short_ratio_pct: dec!(45),
            funding: vec![],
            oi_change_pct: dec!(0.4),
        });

        assert!(provider.fetch_market("BTC").await.is_ok());
        provider.set_failing(true);
        assert!(provider.fetch_market("BTC").await.is_err());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_static_signals_drain() {
        let source = StaticSignalSource::new();
        source.push_batch(vec![]);
        assert!(source.fetch_candidates().await.unwrap().is_empty());
        assert!(source.fetch_candidates().await.unwrap().is_empty());
    }
}
