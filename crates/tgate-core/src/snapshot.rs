//! Snapshots of external market and health state.
//!
//! The loop controller fetches these before gating; the gate only ever
//! sees already-fetched values wrapped in [`Observed`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::Price;

/// Funding rate on one venue, as a per-period rate (0.0001 = 1bp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueFunding {
    pub venue: String,
    pub rate: Decimal,
}

/// Positioning and price data for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Price,
    /// Share of open interest positioned short, in percent.
    pub short_ratio_pct: Decimal,
    #[serde(default)]
    pub funding: Vec<VenueFunding>,
    /// Open-interest change over the provider's short window, in percent.
    #[serde(default)]
    pub oi_change_pct: Decimal,
}

impl MarketSnapshot {
    /// Spread between the highest and lowest venue funding rate.
    ///
    /// `None` with fewer than two venues.
    pub fn funding_divergence(&self) -> Option<Decimal> {
        if self.funding.len() < 2 {
            return None;
        }
        let max = self.funding.iter().map(|f| f.rate).max()?;
        let min = self.funding.iter().map(|f| f.rate).min()?;
        Some(max - min)
    }

    pub fn average_funding(&self) -> Option<Decimal> {
        if self.funding.is_empty() {
            return None;
        }
        let sum: Decimal = self.funding.iter().map(|f| f.rate).sum();
        Some(sum / Decimal::from(self.funding.len()))
    }
}

/// Health ratio of an externally tracked leveraged position.
///
/// `ratio` is `None` when the provider tracks nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub ratio: Option<Decimal>,
}

/// A fetched value plus when it was fetched and whether it is a fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observed<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
    /// Set when the latest refetch failed and this is the last-known value.
    pub stale: bool,
}

impl<T> Observed<T> {
    pub fn fresh(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            fetched_at,
            stale: false,
        }
    }

    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }

    /// Seconds since the value was fetched. Never negative.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_seconds().max(0)
    }
}
