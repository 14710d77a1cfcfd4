//! Controller harness: temp directories, in-memory feeds and a mock venue.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use tgate_bot::{AppConfig, CycleController, Feeds, OperatingMode};
use tgate_core::{
    HealthSnapshot, MarketSnapshot, Price, Side, SignalAttributes, TechnicalFlags,
    TradeCandidate,
};
use tgate_executor::MockExecutionAdapter;
use tgate_feed::{StaticHealthProvider, StaticMarketDataProvider, StaticSignalSource};

pub struct Harness {
    pub dir: TempDir,
    pub config: AppConfig,
    pub signals: Arc<StaticSignalSource>,
    pub market: Arc<StaticMarketDataProvider>,
    pub health: Arc<StaticHealthProvider>,
    pub adapter: Arc<MockExecutionAdapter>,
    pub t0: DateTime<Utc>,
}

impl Harness {
    pub fn new(mode: OperatingMode) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut config = AppConfig {
            mode,
            ..Default::default()
        };
        config.persistence.state_path = dir.path().join("state.json");
        config.persistence.journal_dir = dir.path().join("journal");
        config.feeds.market_ttl_secs = 60;
        config.feeds.health_ttl_secs = 60;
        config.feeds.fetch_timeout_ms = 500;
        config.execution.placement_timeout_ms = 200;
        config.execution.backoff_base_ms = 1;
        config.execution.backoff_max_ms = 2;

        Self {
            dir,
            config,
            signals: Arc::new(StaticSignalSource::new()),
            market: Arc::new(StaticMarketDataProvider::new()),
            health: Arc::new(StaticHealthProvider::untracked()),
            adapter: Arc::new(MockExecutionAdapter::new()),
            t0: Utc::now(),
        }
    }

    /// A controller over this harness's feeds. Restores any saved state.
    pub fn controller(&self) -> CycleController {
        self.config.validate().unwrap();
        let feeds = Feeds {
            signals: self.signals.clone(),
            market: self.market.clone(),
            health: self.health.clone(),
        };
        CycleController::new(&self.config, feeds, self.adapter.clone()).unwrap()
    }

    /// Cycle start time `minutes` after the harness was created.
    pub fn at(&self, minutes: i64) -> DateTime<Utc> {
        self.t0 + Duration::minutes(minutes)
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.market.set(market(symbol, price));
    }

    pub fn set_health(&self, ratio: Decimal) {
        self.health.set(HealthSnapshot { ratio: Some(ratio) });
    }
}

/// A candidate that clears the default minimum score.
pub fn candidate(id: &str, symbol: &str, side: Side, notional: Decimal) -> TradeCandidate {
    TradeCandidate {
        id: id.to_string(),
        symbol: symbol.to_string(),
        side,
        notional,
        reference_price: Price::new(dec!(100)),
        stop_distance_pct: dec!(4),
        attributes: SignalAttributes {
            confidence: dec!(0.9),
            source_id: "desk".to_string(),
            technical: TechnicalFlags {
                trend_aligned: true,
                momentum_aligned: true,
                volume_confirmed: true,
                level_confirmed: true,
            },
            market_condition: dec!(0.5),
            momentum_pct: Decimal::ZERO,
        },
    }
}

/// Neutral positioning at `price`.
pub fn market(symbol: &str, price: Decimal) -> MarketSnapshot {
    MarketSnapshot {
        symbol: symbol.to_string(),
        price: Price::new(price),
        short_ratio_pct: dec!(45),
        funding: Vec::new(),
        oi_change_pct: Decimal::ZERO,
    }
}
