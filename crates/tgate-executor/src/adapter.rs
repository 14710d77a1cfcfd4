//! Exchange adapter seam.
//!
//! The engine never talks to a venue directly. It hands a [`TrancheOrder`] to
//! an [`ExecutionAdapter`] and gets back a [`FillReport`] or an error.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub use tgate_core::BoxFuture;
use tgate_core::{OrderId, OrderSide, PositionId, Price, Size};

use crate::error::{ExecutorError, ExecutorResult};

/// What a placement is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPurpose {
    Entry,
    Exit,
    Stop,
}

/// A single tranche placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrancheOrder {
    pub order_id: OrderId,
    pub position_id: PositionId,
    pub symbol: String,
    pub side: OrderSide,
    pub purpose: OrderPurpose,
    /// Tier index within the ladder; `None` for the stop.
    pub tier: Option<usize>,
    pub price: Price,
    pub size: Size,
    /// Exits and stops only shrink the position.
    pub reduce_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: OrderId,
    pub price: Price,
    pub size: Size,
    pub filled_at: DateTime<Utc>,
}

/// Trait for submitting tranche orders to a venue.
pub trait ExecutionAdapter: Send + Sync {
    /// Submit an order and wait for its fill.
    ///
    /// Retries reuse the `order_id`; an adapter that already filled that id
    /// must return the original fill instead of filling twice.
    fn place(&self, order: TrancheOrder) -> BoxFuture<'_, ExecutorResult<FillReport>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

pub type DynExecutionAdapter = Arc<dyn ExecutionAdapter>;

/// Simulated venue: fills every order immediately at its limit price,
/// shifted against the order by `slippage_bps`.
pub struct PaperExecutionAdapter {
    slippage_bps: Decimal,
    fills: DashMap<OrderId, FillReport>,
}

impl PaperExecutionAdapter {
    pub fn new(slippage_bps: Decimal) -> Self {
        Self {
            slippage_bps,
            fills: DashMap::new(),
        }
    }

    pub fn fill_count(&self) -> usize {
        self.fills.len()
    }

    fn fill_price(&self, order: &TrancheOrder) -> Price {
        let shift = self.slippage_bps / Decimal::from(100);
        match order.side {
            OrderSide::Buy => order.price.offset_pct(shift),
            OrderSide::Sell => order.price.offset_pct(-shift),
        }
    }
}

impl Default for PaperExecutionAdapter {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}

impl ExecutionAdapter for PaperExecutionAdapter {
    fn place(&self, order: TrancheOrder) -> BoxFuture<'_, ExecutorResult<FillReport>> {
        Box::pin(async move {
            if let Some(existing) = self.fills.get(&order.order_id) {
                debug!(order_id = %order.order_id, "Duplicate placement, returning prior fill");
                return Ok(existing.clone());
            }
            let report = FillReport {
                order_id: order.order_id.clone(),
                price: self.fill_price(&order),
                size: order.size,
                filled_at: Utc::now(),
            };
            trace!(
                order_id = %order.order_id,
                symbol = %order.symbol,
                side = %order.side,
                price = %report.price,
                size = %report.size,
                "Paper fill"
            );
            self.fills.insert(order.order_id, report.clone());
            Ok(report)
        })
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}

/// Scripted outcome for [`MockExecutionAdapter`].
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Fill at the order's price.
    Fill,
    /// Fill at a specific price.
    FillAt(Price),
    Reject(String),
    Unavailable(String),
    /// Never completes; exercises the placement timeout.
    Hang,
}

/// Mock adapter for testing.
///
/// Outcomes are consumed from the script in order; once it is empty every
/// placement gets the default outcome.
pub struct MockExecutionAdapter {
    orders: Mutex<Vec<TrancheOrder>>,
    script: Mutex<VecDeque<MockOutcome>>,
    default_outcome: Mutex<MockOutcome>,
}

impl MockExecutionAdapter {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(MockOutcome::Fill),
        }
    }

    /// Queue an outcome for the next unscripted placement.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn set_default_outcome(&self, outcome: MockOutcome) {
        *self.default_outcome.lock() = outcome;
    }

    /// Every order received, in order.
    pub fn get_orders(&self) -> Vec<TrancheOrder> {
        self.orders.lock().clone()
    }

    pub fn clear(&self) {
        self.orders.lock().clear();
    }

    fn next_outcome(&self) -> MockOutcome {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.lock().clone())
    }
}

impl Default for MockExecutionAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionAdapter for MockExecutionAdapter {
    fn place(&self, order: TrancheOrder) -> BoxFuture<'_, ExecutorResult<FillReport>> {
        self.orders.lock().push(order.clone());
        let outcome = self.next_outcome();
        Box::pin(async move {
            let price = match outcome {
                MockOutcome::Fill => order.price,
                MockOutcome::FillAt(price) => price,
                MockOutcome::Reject(reason) => return Err(ExecutorError::Rejected(reason)),
                MockOutcome::Unavailable(reason) => {
                    return Err(ExecutorError::Unavailable(reason))
                }
                MockOutcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return Err(ExecutorError::Unavailable("hung".to_string()));
                }
            };
            Ok(FillReport {
                order_id: order.order_id,
                price,
                size: order.size,
                filled_at: Utc::now(),
            })
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(side: OrderSide) -> TrancheOrder {
        TrancheOrder {
            order_id: OrderId::new(),
            position_id: PositionId::new(),
            symbol: "ETH".to_string(),
            side,
            purpose: OrderPurpose::Entry,
            tier: Some(0),
            price: Price::new(dec!(2000)),
            size: Size::new(dec!(0.5)),
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn test_paper_fill_applies_slippage_against_order() {
        let adapter = PaperExecutionAdapter::new(dec!(10));

        let buy = adapter.place(order(OrderSide::Buy)).await.unwrap();
        assert_eq!(buy.price, Price::new(dec!(2002)));

        let sell = adapter.place(order(OrderSide::Sell)).await.unwrap();
        assert_eq!(sell.price, Price::new(dec!(1998)));
    }

    #[tokio::test]
    async fn test_paper_deduplicates_retries() {
        let adapter = PaperExecutionAdapter::default();
        let o = order(OrderSide::Buy);

        let first = adapter.place(o.clone()).await.unwrap();
        let second = adapter.place(o).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(adapter.fill_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_script_then_default() {
        let adapter = MockExecutionAdapter::new();
        adapter.push_outcome(MockOutcome::Reject("min size".to_string()));

        let err = adapter.place(order(OrderSide::Buy)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Rejected(_)));
        assert!(adapter.place(order(OrderSide::Buy)).await.is_ok());
        assert_eq!(adapter.get_orders().len(), 2);
    }
}
