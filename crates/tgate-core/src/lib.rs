//! Core domain types for the tactical risk gate.
//!
//! This crate provides the types shared by every stage of the cycle:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Side`, `OrderSide`: Position direction and order direction
//! - `TradeCandidate`, `ScoredCandidate`: Proposed trades before and after scoring
//! - `MarketSnapshot`, `HealthSnapshot`, `Observed`: Fetched external state with freshness

pub mod boxed;
pub mod candidate;
pub mod decimal;
pub mod error;
pub mod order;
pub mod snapshot;

pub use boxed::BoxFuture;
pub use candidate::{
    ScoreComponents, ScoredCandidate, SignalAttributes, TechnicalFlags, TradeCandidate,
};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use order::{OrderId, OrderSide, PositionId, Side};
pub use snapshot::{HealthSnapshot, MarketSnapshot, Observed, VenueFunding};
