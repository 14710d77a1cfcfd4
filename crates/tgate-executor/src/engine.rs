//! Ladder execution engine.
//!
//! Per cycle and per position, [`LadderEngine::manage`] runs in a fixed order:
//! 1. Expire entries that have rested too long
//! 2. Submit entry tranches whose trigger is met
//! 3. Exit everything at the stop if it is breached
//! 4. Submit exit tranches whose trigger is met
//!
//! Entry placements get one retry and are then skipped. Exit and stop
//! placements retry with exponential backoff; when they still fail the
//! position is flagged for attention and retried on the next cycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tgate_core::{OrderId, PositionId, Price, Side, Size, TradeCandidate};
use tgate_position::{
    CloseReason, LadderConfig, Position, PositionBook, PositionHandle, TrancheKind,
};

use crate::adapter::{DynExecutionAdapter, FillReport, OrderPurpose, TrancheOrder};
use crate::error::{ExecutorError, ExecutorResult};

/// Placement retry and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-attempt timeout for a placement.
    #[serde(default = "default_placement_timeout_ms")]
    pub placement_timeout_ms: u64,
    /// Total attempts for an entry tranche before it is skipped.
    #[serde(default = "default_entry_max_attempts")]
    pub entry_max_attempts: u32,
    /// Total attempts per cycle for an exit or stop placement.
    #[serde(default = "default_exit_max_attempts")]
    pub exit_max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Slippage applied by the paper adapter, in basis points.
    #[serde(default)]
    pub paper_slippage_bps: Decimal,
}

fn default_placement_timeout_ms() -> u64 {
    5_000
}

fn default_entry_max_attempts() -> u32 {
    2
}

fn default_exit_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    4_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            placement_timeout_ms: default_placement_timeout_ms(),
            entry_max_attempts: default_entry_max_attempts(),
            exit_max_attempts: default_exit_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            paper_slippage_bps: Decimal::ZERO,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.placement_timeout_ms == 0 {
            return Err("placement_timeout_ms must be positive".to_string());
        }
        if self.entry_max_attempts == 0 || self.exit_max_attempts == 0 {
            return Err("max attempts must be at least 1".to_string());
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err("backoff_max_ms must be >= backoff_base_ms".to_string());
        }
        if self.paper_slippage_bps < Decimal::ZERO {
            return Err("paper_slippage_bps must be non-negative".to_string());
        }
        Ok(())
    }

    /// Delay after the given failed attempt (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Something that happened to a position during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PositionEvent {
    Deployed {
        position_id: PositionId,
        symbol: String,
        side: Side,
        notional: Decimal,
        entry_tiers: usize,
    },
    EntryFilled {
        position_id: PositionId,
        tier: usize,
        price: Price,
        size: Size,
    },
    EntrySkipped {
        position_id: PositionId,
        tier: usize,
        error: String,
    },
    EntriesExpired {
        position_id: PositionId,
        count: usize,
    },
    ExitFilled {
        position_id: PositionId,
        tier: usize,
        price: Price,
        size: Size,
        pnl: Decimal,
    },
    StopFilled {
        position_id: PositionId,
        price: Price,
        size: Size,
        pnl: Decimal,
    },
    Closed {
        position_id: PositionId,
        symbol: String,
        reason: CloseReason,
        realized_pnl: Decimal,
    },
    AttentionRequired {
        position_id: PositionId,
        reason: String,
    },
    /// Triggered tranches left unsubmitted because the cycle was cancelled.
    PlacementsDeferred {
        position_id: PositionId,
        count: usize,
    },
}

impl PositionEvent {
    /// Realized P&L booked by this event, if any.
    pub fn realized_pnl(&self) -> Option<Decimal> {
        match self {
            Self::ExitFilled { pnl, .. } | Self::StopFilled { pnl, .. } => Some(*pnl),
            _ => None,
        }
    }
}

/// What a placement targets on the position.
#[derive(Debug, Clone, Copy)]
enum Target {
    Entry(usize),
    Exit(usize),
    Stop,
}

impl Target {
    fn purpose(&self) -> OrderPurpose {
        match self {
            Self::Entry(_) => OrderPurpose::Entry,
            Self::Exit(_) => OrderPurpose::Exit,
            Self::Stop => OrderPurpose::Stop,
        }
    }

    fn tier(&self) -> Option<usize> {
        match self {
            Self::Entry(i) | Self::Exit(i) => Some(*i),
            Self::Stop => None,
        }
    }
}

pub struct LadderEngine {
    adapter: DynExecutionAdapter,
    ladder: LadderConfig,
    config: ExecutionConfig,
}

impl LadderEngine {
    pub fn new(adapter: DynExecutionAdapter, ladder: LadderConfig, config: ExecutionConfig) -> Self {
        Self {
            adapter,
            ladder,
            config,
        }
    }

    pub fn ladder(&self) -> &LadderConfig {
        &self.ladder
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Plan a ladder for an admitted candidate, add it to the book and work
    /// it once at the current price.
    ///
    /// Refuses to start when `cancel` is already set.
    #[allow(clippy::too_many_arguments)]
    pub async fn deploy(
        &self,
        book: &PositionBook,
        candidate: &TradeCandidate,
        notional: Decimal,
        stop_distance_pct: Decimal,
        price: Price,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ExecutorResult<(PositionHandle, Vec<PositionEvent>)> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }
        let position = Position::plan(candidate, notional, stop_distance_pct, &self.ladder, now)?;

        info!(
            position = %position.id,
            candidate = %candidate.id,
            symbol = %position.symbol,
            side = %position.side,
            notional = %notional,
            stop_pct = %stop_distance_pct,
            tiers = position.entries.len(),
            adapter = self.adapter.name(),
            "Deploying ladder"
        );

        let mut events = vec![PositionEvent::Deployed {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            notional,
            entry_tiers: position.entries.len(),
        }];
        let handle = book.insert(position);
        events.extend(self.manage(&handle, price, now, cancel).await);
        Ok((handle, events))
    }

    /// Work one position at the observed `price`.
    pub async fn manage(
        &self,
        handle: &PositionHandle,
        price: Price,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<PositionEvent> {
        let mut position = handle.lock().await;
        let mut events = Vec::new();
        if position.is_closed() {
            return events;
        }
        position.mark(price);

        let expired = position.expire_entries(now, self.ladder.entry_timeout_secs);
        if expired > 0 {
            info!(position = %position.id, count = expired, "Entry tranches expired");
            events.push(PositionEvent::EntriesExpired {
                position_id: position.id.clone(),
                count: expired,
            });
            if position.is_closed() {
                events.push(closed_event(&position));
                return events;
            }
        }

        self.work_entries(&mut position, price, now, cancel, &mut events)
            .await;

        if position.stop_triggered(price) {
            self.work_stop(&mut position, price, now, &mut events).await;
            return events;
        }

        self.work_exits(&mut position, price, now, cancel, &mut events)
            .await;
        position.mark(price);
        events
    }

    async fn work_entries(
        &self,
        position: &mut Position,
        price: Price,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        events: &mut Vec<PositionEvent>,
    ) {
        let triggered = position.triggered_entries(price);
        for (n, index) in triggered.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                defer(position, triggered.len() - n, events);
                return;
            }
            let size = position.entries[index].quantity;
            let level = position.entries[index].trigger.level();
            match self
                .submit(position, Target::Entry(index), level, size, Some(cancel))
                .await
            {
                Ok(fill) => {
                    if let Err(e) = position.apply_entry_fill(index, fill.price, fill.size, now) {
                        error!(position = %position.id, tier = index, error = %e, "Entry fill rejected by position");
                        continue;
                    }
                    events.push(PositionEvent::EntryFilled {
                        position_id: position.id.clone(),
                        tier: index,
                        price: fill.price,
                        size: fill.size,
                    });
                }
                Err(ExecutorError::Cancelled) => {
                    defer(position, triggered.len() - n, events);
                    return;
                }
                Err(e) => {
                    warn!(
                        position = %position.id,
                        tier = index,
                        error = %e,
                        "Entry tranche skipped after retries"
                    );
                    position.skip_entry(index, now);
                    events.push(PositionEvent::EntrySkipped {
                        position_id: position.id.clone(),
                        tier: index,
                        error: e.to_string(),
                    });
                    if position.is_closed() {
                        events.push(closed_event(position));
                        return;
                    }
                }
            }
        }
    }

    async fn work_stop(
        &self,
        position: &mut Position,
        price: Price,
        now: DateTime<Utc>,
        events: &mut Vec<PositionEvent>,
    ) {
        let size = position.open_quantity;
        warn!(
            position = %position.id,
            symbol = %position.symbol,
            price = %price,
            stop = ?position.stop.map(|s| s.price.to_string()),
            "Stop breached"
        );
        // Protective: never deferred by cancellation.
        match self.submit(position, Target::Stop, price, size, None).await {
            Ok(fill) => match position.apply_stop_fill(fill.price, now) {
                Ok(pnl) => {
                    position.clear_attention();
                    events.push(PositionEvent::StopFilled {
                        position_id: position.id.clone(),
                        price: fill.price,
                        size,
                        pnl,
                    });
                    events.push(closed_event(position));
                }
                Err(e) => {
                    error!(position = %position.id, error = %e, "Stop fill rejected by position");
                }
            },
            Err(e) => {
                let reason = format!(
                    "stop placement failed after {} attempts: {e}",
                    self.config.exit_max_attempts
                );
                attention(position, reason, now, events);
            }
        }
    }

    async fn work_exits(
        &self,
        position: &mut Position,
        price: Price,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        events: &mut Vec<PositionEvent>,
    ) {
        let triggered = position.triggered_exits(price);
        for (n, index) in triggered.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                defer(position, triggered.len() - n, events);
                return;
            }
            let size = position.exits[index].quantity.min(position.open_quantity);
            let level = position.exits[index].trigger.level();
            match self
                .submit(position, Target::Exit(index), level, size, Some(cancel))
                .await
            {
                Ok(fill) => {
                    let pnl = match position.apply_exit_fill(index, fill.price, fill.size, now) {
                        Ok(pnl) => pnl,
                        Err(e) => {
                            error!(position = %position.id, tier = index, error = %e, "Exit fill rejected by position");
                            continue;
                        }
                    };
                    position.clear_attention();
                    events.push(PositionEvent::ExitFilled {
                        position_id: position.id.clone(),
                        tier: index,
                        price: fill.price,
                        size: fill.size,
                        pnl,
                    });
                    if position.is_closed() {
                        events.push(closed_event(position));
                        return;
                    }
                }
                Err(ExecutorError::Cancelled) => {
                    defer(position, triggered.len() - n, events);
                    return;
                }
                Err(e) => {
                    let reason = format!(
                        "exit tier {index} failed after {} attempts: {e}",
                        self.config.exit_max_attempts
                    );
                    attention(position, reason, now, events);
                    return;
                }
            }
        }
    }

    /// Place one order with the retry policy for its target.
    ///
    /// Entry and exit retries stop as soon as `cancel` is set; stops pass
    /// `None` and always run every attempt.
    async fn submit(
        &self,
        position: &mut Position,
        target: Target,
        price: Price,
        size: Size,
        cancel: Option<&CancellationToken>,
    ) -> ExecutorResult<FillReport> {
        let (order_id, side, max_attempts) = match target {
            Target::Entry(i) => (
                position.entries[i].order_id.clone(),
                position.side.entry_side(),
                self.config.entry_max_attempts,
            ),
            Target::Exit(i) => (
                position.exits[i].order_id.clone(),
                position.side.exit_side(),
                self.config.exit_max_attempts,
            ),
            Target::Stop => (
                OrderId::new(),
                position.side.exit_side(),
                self.config.exit_max_attempts,
            ),
        };
        let order = TrancheOrder {
            order_id,
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            side,
            purpose: target.purpose(),
            tier: target.tier(),
            price,
            size,
            reduce_only: !matches!(target, Target::Entry(_)),
        };
        let timeout = Duration::from_millis(self.config.placement_timeout_ms);

        let mut attempt = 0;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(ExecutorError::Cancelled);
            }
            attempt += 1;
            let result = match tokio::time::timeout(timeout, self.adapter.place(order.clone())).await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Timeout(self.config.placement_timeout_ms)),
            };
            let err = match result {
                Ok(fill) => {
                    debug!(
                        order_id = %order.order_id,
                        purpose = ?order.purpose,
                        attempt,
                        price = %fill.price,
                        "Placement filled"
                    );
                    return Ok(fill);
                }
                Err(e) => e,
            };

            warn!(
                position = %position.id,
                order_id = %order.order_id,
                purpose = ?order.purpose,
                attempt,
                max_attempts,
                error = %err,
                "Placement attempt failed"
            );
            match target {
                Target::Entry(i) => position.record_attempt_failure(TrancheKind::Entry, i, &err.to_string()),
                Target::Exit(i) => position.record_attempt_failure(TrancheKind::Exit, i, &err.to_string()),
                Target::Stop => {}
            }
            if attempt >= max_attempts || !err.is_retryable() {
                return Err(err);
            }
            tokio::time::sleep(self.config.backoff(attempt)).await;
        }
    }
}

fn closed_event(position: &Position) -> PositionEvent {
    PositionEvent::Closed {
        position_id: position.id.clone(),
        symbol: position.symbol.clone(),
        reason: position.close_reason.unwrap_or(CloseReason::ExitLadderComplete),
        realized_pnl: position.realized_pnl,
    }
}

fn defer(position: &Position, count: usize, events: &mut Vec<PositionEvent>) {
    info!(position = %position.id, count, "Cycle cancelled, placements deferred");
    events.push(PositionEvent::PlacementsDeferred {
        position_id: position.id.clone(),
        count,
    });
}

fn attention(
    position: &mut Position,
    reason: String,
    now: DateTime<Utc>,
    events: &mut Vec<PositionEvent>,
) {
    error!(position = %position.id, symbol = %position.symbol, reason = %reason, "Position needs attention");
    position.flag_attention(reason.clone(), now);
    events.push(PositionEvent::AttentionRequired {
        position_id: position.id.clone(),
        reason,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{MockExecutionAdapter, MockOutcome};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tgate_core::{SignalAttributes, TechnicalFlags};
    use tgate_position::{PositionStatus, StopStage, TrancheStatus};

    fn candidate() -> TradeCandidate {
        TradeCandidate {
            id: "c-1".to_string(),
            symbol: "SOL".to_string(),
            side: Side::Long,
            notional: dec!(1000),
            reference_price: Price::new(dec!(100)),
            stop_distance_pct: dec!(5),
            attributes: SignalAttributes {
                confidence: dec!(0.8),
                source_id: "desk".to_string(),
                technical: TechnicalFlags::default(),
                market_condition: dec!(0.5),
                momentum_pct: Decimal::ZERO,
            },
        }
    }

    fn fast_config() -> ExecutionConfig {
        ExecutionConfig {
            placement_timeout_ms: 50,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..Default::default()
        }
    }

    fn engine(adapter: Arc<MockExecutionAdapter>) -> LadderEngine {
        LadderEngine::new(adapter, LadderConfig::default(), fast_config())
    }

    async fn deployed(
        engine: &LadderEngine,
        book: &PositionBook,
    ) -> (PositionHandle, Vec<PositionEvent>) {
        engine
            .deploy(
                book,
                &candidate(),
                dec!(1000),
                dec!(5),
                Price::new(dec!(100)),
                Utc::now(),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
    }

    fn px(v: Decimal) -> Price {
        Price::new(v)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ExecutionConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 300,
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_deploy_fills_first_tier_at_reference() {
        let adapter = Arc::new(MockExecutionAdapter::new());
        let engine = engine(adapter.clone());
        let book = PositionBook::default();

        let (handle, events) = deployed(&engine, &book).await;

        assert!(matches!(events[0], PositionEvent::Deployed { entry_tiers: 4, .. }));
        assert!(matches!(events[1], PositionEvent::EntryFilled { tier: 0, .. }));
        let p = handle.lock().await;
        assert_eq!(p.status, PositionStatus::PartiallyFilled);
        assert_eq!(p.open_quantity, Size::new(dec!(4)));
        assert_eq!(p.stop.unwrap().price, px(dec!(95)));
        assert_eq!(book.len(), 1);

        let orders = adapter.get_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].purpose, OrderPurpose::Entry);
        assert!(!orders[0].reduce_only);
    }

    #[tokio::test]
    async fn test_deploy_refused_after_cancel() {
        let adapter = Arc::new(MockExecutionAdapter::new());
        let engine = engine(adapter.clone());
        let book = PositionBook::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine
            .deploy(&book, &candidate(), dec!(1000), dec!(5), px(dec!(100)), Utc::now(), &cancel)
            .await;
        assert!(matches!(result, Err(ExecutorError::Cancelled)));
        assert!(book.is_empty());
        assert!(adapter.get_orders().is_empty());
    }

    #[tokio::test]
    async fn test_failed_entry_retried_once_then_skipped() {
        let adapter = Arc::new(MockExecutionAdapter::new());
        adapter.push_outcome(MockOutcome::Unavailable("502".to_string()));
        adapter.push_outcome(MockOutcome::Unavailable("502".to_string()));
        let engine = engine(adapter.clone());
        let book = PositionBook::default();

        let (handle, events) = deployed(&engine, &book).await;
        assert!(matches!(events[1], PositionEvent::EntrySkipped { tier: 0, .. }));

        let orders = adapter.get_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].order_id, orders[1].order_id);

        // The rest of the ladder still works.
        let events = engine
            .manage(&handle, px(dec!(99)), Utc::now(), &CancellationToken::new())
            .await;
        assert!(matches!(events[0], PositionEvent::EntryFilled { tier: 1, .. }));
        let p = handle.lock().await;
        assert_eq!(p.entries[0].status, TrancheStatus::Skipped);
        assert_eq!(p.entries[0].attempts, 2);
        assert_eq!(p.open_quantity, Size::new(dec!(3)));
    }

    #[tokio::test]
    async fn test_placement_timeout_counts_as_failure() {
        let adapter = Arc::new(MockExecutionAdapter::new());
        adapter.set_default_outcome(MockOutcome::Hang);
        let engine = engine(adapter.clone());
        let book = PositionBook::default();

        let (_, events) = deployed(&engine, &book).await;
        match &events[1] {
            PositionEvent::EntrySkipped { error, .. } => assert!(error.contains("timed out")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exit_ladder_ratchets_and_closes() {
        let adapter = Arc::new(MockExecutionAdapter::new());
        let engine = engine(adapter.clone());
        let book = PositionBook::default();
        let (handle, _) = deployed(&engine, &book).await;
        let cancel = CancellationToken::new();

        let events = engine.manage(&handle, px(dec!(110)), Utc::now(), &cancel).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].realized_pnl(), Some(dec!(10.8)));
        {
            let p = handle.lock().await;
            assert_eq!(p.stop.unwrap().stage, StopStage::Breakeven);
            assert_eq!(p.stop.unwrap().price, px(dec!(100)));
            assert!(p.entries[1..].iter().all(|t| t.status == TrancheStatus::Cancelled));
        }

        let events = engine.manage(&handle, px(dec!(140)), Utc::now(), &cancel).await;
        let pnl: Decimal = events.iter().filter_map(PositionEvent::realized_pnl).sum();
        assert_eq!(pnl, dec!(68.4));
        match events.last().unwrap() {
            PositionEvent::Closed { reason, realized_pnl, .. } => {
                assert_eq!(*reason, CloseReason::ExitLadderComplete);
                assert_eq!(*realized_pnl, dec!(79.2));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(adapter
            .get_orders()
            .iter()
            .filter(|o| o.purpose == OrderPurpose::Exit)
            .all(|o| o.reduce_only));
    }

    #[tokio::test]
    async fn test_gap_down_fills_entries_then_stops_out() {
        let adapter = Arc::new(MockExecutionAdapter::new());
        let engine = engine(adapter.clone());
        let book = PositionBook::default();
        let (handle, _) = deployed(&engine, &book).await;

        let events = engine
            .manage(&handle, px(dec!(94)), Utc::now(), &CancellationToken::new())
            .await;

        let fills = events
            .iter()
            .filter(|e| matches!(e, PositionEvent::EntryFilled { .. }))
            .count();
        assert_eq!(fills, 3);
        let stop_pnl = events.iter().find_map(|e| match e {
            PositionEvent::StopFilled { pnl, .. } => Some(*pnl),
            _ => None,
        });
        assert_eq!(stop_pnl, Some(dec!(-50)));
        assert!(matches!(
            events.last(),
            Some(PositionEvent::Closed { reason: CloseReason::StopLoss, .. })
        ));
        assert!(handle.lock().await.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_defers_entries_but_not_stop() {
        let adapter = Arc::new(MockExecutionAdapter::new());
        let engine = engine(adapter.clone());
        let book = PositionBook::default();
        let (handle, _) = deployed(&engine, &book).await;
        adapter.clear();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = engine.manage(&handle, px(dec!(94)), Utc::now(), &cancel).await;

        assert!(matches!(events[0], PositionEvent::PlacementsDeferred { count: 3, .. }));
        assert!(matches!(events[1], PositionEvent::StopFilled { .. }));
        assert_eq!(events[1].realized_pnl(), Some(dec!(-24)));
        let orders = adapter.get_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].purpose, OrderPurpose::Stop);
    }

    #[tokio::test]
    async fn test_exit_failure_flags_attention_until_filled() {
        let adapter = Arc::new(MockExecutionAdapter::new());
        let engine = engine(adapter.clone());
        let book = PositionBook::default();
        let (handle, _) = deployed(&engine, &book).await;
        let cancel = CancellationToken::new();

        adapter.set_default_outcome(MockOutcome::Unavailable("maintenance".to_string()));
        let events = engine.manage(&handle, px(dec!(110)), Utc::now(), &cancel).await;
        assert!(matches!(events[0], PositionEvent::AttentionRequired { .. }));
        {
            let p = handle.lock().await;
            assert!(p.needs_attention);
            assert_eq!(p.exits[0].attempts, 3);
            assert!(p.exits[0].is_pending());
        }

        adapter.set_default_outcome(MockOutcome::Fill);
        let events = engine.manage(&handle, px(dec!(110)), Utc::now(), &cancel).await;
        assert!(matches!(events[0], PositionEvent::ExitFilled { tier: 0, .. }));
        assert!(!handle.lock().await.needs_attention);
    }

    #[tokio::test]
    async fn test_stale_entries_expire() {
        let adapter = Arc::new(MockExecutionAdapter::new());
        let engine = engine(adapter.clone());
        let book = PositionBook::default();
        let (handle, _) = deployed(&engine, &book).await;

        let later = handle.lock().await.opened_at + chrono::Duration::hours(5);
        let events = engine
            .manage(&handle, px(dec!(100)), later, &CancellationToken::new())
            .await;
        assert!(matches!(events[0], PositionEvent::EntriesExpired { count: 3, .. }));
        let p = handle.lock().await;
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(p.exposure(), dec!(400));
    }
}
