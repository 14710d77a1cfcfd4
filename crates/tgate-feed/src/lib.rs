//! External inputs for the cycle.
//!
//! Candidates, market snapshots and health readings come from collaborator
//! traits. [`TtlCache`] bounds upstream call volume and falls back to the
//! last-known value, flagged stale, when a refetch fails.

pub mod cache;
pub mod config;
pub mod error;
pub mod file;
pub mod fixed;
pub mod provider;

pub use cache::TtlCache;
pub use config::FeedConfig;
pub use error::{FeedError, FeedResult};
pub use file::{FileHealthProvider, FileMarketDataProvider, JsonlSignalSource};
pub use fixed::{StaticHealthProvider, StaticMarketDataProvider, StaticSignalSource};
pub use provider::{
    DynHealthMetricProvider, DynMarketDataProvider, DynSignalSource, HealthMetricProvider,
    MarketDataProvider, SignalSource,
};
