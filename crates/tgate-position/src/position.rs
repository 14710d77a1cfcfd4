//! Position and tranche model.
//!
//! All methods here are synchronous state transitions. The execution engine
//! decides when to call them and talks to the exchange adapter; the position
//! only records what happened.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tgate_core::{OrderId, PositionId, Price, Side, Size, TradeCandidate};

use crate::error::{PositionError, PositionResult};
use crate::ladder::{LadderConfig, TierSpec, MAX_TIERS};

/// Price condition that releases a resting tranche.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "when", content = "price", rename_all = "snake_case")]
pub enum TriggerCondition {
    AtOrBelow(Price),
    AtOrAbove(Price),
}

impl TriggerCondition {
    pub fn is_met(&self, price: Price) -> bool {
        match self {
            Self::AtOrBelow(level) => price <= *level,
            Self::AtOrAbove(level) => price >= *level,
        }
    }

    pub fn level(&self) -> Price {
        match self {
            Self::AtOrBelow(p) | Self::AtOrAbove(p) => *p,
        }
    }

    /// Trigger for a level reached by moving against `side`.
    fn adverse(side: Side, level: Price) -> Self {
        match side {
            Side::Long => Self::AtOrBelow(level),
            Side::Short => Self::AtOrAbove(level),
        }
    }

    /// Trigger for a level reached by moving in favor of `side`.
    fn favorable(side: Side, level: Price) -> Self {
        match side {
            Side::Long => Self::AtOrAbove(level),
            Side::Short => Self::AtOrBelow(level),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrancheKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrancheStatus {
    Pending,
    Filled,
    Skipped,
    Cancelled,
}

/// One tier of a ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tranche {
    pub tier: usize,
    pub kind: TrancheKind,
    /// Tier offset in percent, from the reference price (entries) or the
    /// average entry (exits).
    pub offset_pct: Decimal,
    /// Reused across retries so the adapter can deduplicate.
    pub order_id: OrderId,
    pub fraction: Decimal,
    pub trigger: TriggerCondition,
    pub quantity: Size,
    pub status: TrancheStatus,
    pub fill_price: Option<Price>,
    pub filled_qty: Size,
    pub filled_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Tranche {
    fn new(tier: usize, kind: TrancheKind, spec: &TierSpec, trigger: TriggerCondition) -> Self {
        Self {
            tier,
            kind,
            offset_pct: spec.offset_pct,
            order_id: OrderId::new(),
            fraction: spec.fraction,
            trigger,
            quantity: Size::ZERO,
            status: TrancheStatus::Pending,
            fill_price: None,
            filled_qty: Size::ZERO,
            filled_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TrancheStatus::Pending
    }

    pub fn is_filled(&self) -> bool {
        self.status == TrancheStatus::Filled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    /// No entry filled yet.
    Pending,
    /// Some entries filled, others still resting.
    PartiallyFilled,
    /// Entries resolved, no exit filled yet.
    Open,
    /// At least one exit filled.
    Closing,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStage {
    Initial,
    Breakeven,
    LockTier1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLevel {
    pub price: Price,
    pub stage: StopStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ExitLadderComplete,
    StopLoss,
    /// Entry window elapsed with nothing filled.
    EntryExpired,
}

/// A laddered position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub candidate_id: String,
    pub symbol: String,
    pub side: Side,
    pub status: PositionStatus,
    pub reference_price: Price,
    /// Approved notional after gate adjustments.
    pub notional: Decimal,
    pub planned_quantity: Size,
    pub stop_distance_pct: Decimal,
    pub entries: Vec<Tranche>,
    pub exits: Vec<Tranche>,
    pub avg_entry_price: Option<Price>,
    /// Total quantity bought (long) or sold (short) by entries.
    pub entered_quantity: Size,
    /// Quantity still held.
    pub open_quantity: Size,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_price: Option<Price>,
    pub stop: Option<StopLevel>,
    pub needs_attention: bool,
    pub attention_reason: Option<String>,
    pub close_reason: Option<CloseReason>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Build the entry and exit plan for an admitted candidate.
    ///
    /// Exit levels are placeholders until the first entry fills, since they
    /// are anchored to the average entry price.
    pub fn plan(
        candidate: &TradeCandidate,
        notional: Decimal,
        stop_distance_pct: Decimal,
        ladder: &LadderConfig,
        now: DateTime<Utc>,
    ) -> PositionResult<Self> {
        if notional <= Decimal::ZERO {
            return Err(PositionError::InvalidState(format!(
                "approved notional must be positive, got {notional}"
            )));
        }
        let entry_specs = ladder.entry_plan(candidate.attributes.momentum_pct);
        if entry_specs.len() > MAX_TIERS || ladder.exit_tiers.len() > MAX_TIERS {
            return Err(PositionError::InvalidLadder(format!(
                "more than {MAX_TIERS} tiers"
            )));
        }

        let side = candidate.side;
        let reference = candidate.reference_price;
        let planned_quantity = Size::from_notional(notional, reference);

        let entries = entry_specs
            .iter()
            .enumerate()
            .map(|(tier, spec)| {
                let level = reference.offset_pct(spec.offset_pct * side.sign());
                let mut t = Tranche::new(
                    tier,
                    TrancheKind::Entry,
                    spec,
                    TriggerCondition::adverse(side, level),
                );
                t.quantity = planned_quantity * spec.fraction;
                t
            })
            .collect();

        let exits = ladder
            .exit_tiers
            .iter()
            .enumerate()
            .map(|(tier, spec)| {
                let level = reference.offset_pct(spec.offset_pct * side.sign());
                Tranche::new(
                    tier,
                    TrancheKind::Exit,
                    spec,
                    TriggerCondition::favorable(side, level),
                )
            })
            .collect();

        let mut position = Self {
            id: PositionId::new(),
            candidate_id: candidate.id.clone(),
            symbol: candidate.symbol.clone(),
            side,
            status: PositionStatus::Pending,
            reference_price: reference,
            notional,
            planned_quantity,
            stop_distance_pct,
            entries,
            exits,
            avg_entry_price: None,
            entered_quantity: Size::ZERO,
            open_quantity: Size::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_price: None,
            stop: None,
            needs_attention: false,
            attention_reason: None,
            close_reason: None,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        };
        position.check_fractions()?;
        Ok(position)
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    /// Entry fractions of filled plus pending tranches must not exceed 1 and
    /// exit fractions must sum to 1.
    pub fn check_fractions(&self) -> PositionResult<()> {
        let tolerance = Decimal::new(1, 4);
        let live_entries: Decimal = self
            .entries
            .iter()
            .filter(|t| matches!(t.status, TrancheStatus::Pending | TrancheStatus::Filled))
            .map(|t| t.fraction)
            .sum();
        if live_entries > Decimal::ONE + tolerance {
            return Err(PositionError::InvalidLadder(format!(
                "entry fractions sum to {live_entries}"
            )));
        }
        let exits: Decimal = self.exits.iter().map(|t| t.fraction).sum();
        if (exits - Decimal::ONE).abs() > tolerance {
            return Err(PositionError::InvalidLadder(format!(
                "exit fractions sum to {exits}"
            )));
        }
        Ok(())
    }

    /// Indices of pending entries whose trigger is met at `price`.
    pub fn triggered_entries(&self, price: Price) -> Vec<usize> {
        if self.is_closed() || self.exits.iter().any(Tranche::is_filled) {
            return Vec::new();
        }
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_pending() && t.trigger.is_met(price))
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of pending exits whose trigger is met at `price`.
    pub fn triggered_exits(&self, price: Price) -> Vec<usize> {
        if !self.open_quantity.is_positive() {
            return Vec::new();
        }
        self.exits
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_pending() && t.quantity.is_positive() && t.trigger.is_met(price))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn stop_triggered(&self, price: Price) -> bool {
        match self.stop {
            Some(stop) if self.open_quantity.is_positive() => {
                TriggerCondition::adverse(self.side, stop.price).is_met(price)
            }
            _ => false,
        }
    }

    /// Record an entry fill and re-derive average entry, exits and stop.
    pub fn apply_entry_fill(
        &mut self,
        index: usize,
        price: Price,
        quantity: Size,
        now: DateTime<Utc>,
    ) -> PositionResult<()> {
        let tranche = self.entries.get_mut(index).ok_or_else(|| {
            PositionError::InvalidState(format!("entry tier {index} does not exist"))
        })?;
        if !tranche.is_pending() {
            return Err(PositionError::InvalidState(format!(
                "entry tier {index} is {:?}, not pending",
                tranche.status
            )));
        }
        tranche.status = TrancheStatus::Filled;
        tranche.fill_price = Some(price);
        tranche.filled_qty = quantity;
        tranche.filled_at = Some(now);
        tranche.last_error = None;

        self.entered_quantity = self.entered_quantity + quantity;
        self.open_quantity = self.open_quantity + quantity;
        self.recompute_average_entry();
        self.rearm_exits();
        self.refresh_initial_stop();
        self.updated_at = now;
        self.refresh_status();

        debug!(
            position = %self.id,
            tier = index,
            price = %price,
            avg_entry = ?self.avg_entry_price.map(|p| p.to_string()),
            "Entry filled"
        );
        Ok(())
    }

    /// Record an exit fill. Returns the realized P&L of this fill.
    pub fn apply_exit_fill(
        &mut self,
        index: usize,
        price: Price,
        quantity: Size,
        now: DateTime<Utc>,
    ) -> PositionResult<Decimal> {
        let avg = self.avg_entry_price.ok_or_else(|| {
            PositionError::InvalidState(format!("{} has no filled entries", self.id))
        })?;
        let tranche = self.exits.get_mut(index).ok_or_else(|| {
            PositionError::InvalidState(format!("exit tier {index} does not exist"))
        })?;
        if !tranche.is_pending() {
            return Err(PositionError::InvalidState(format!(
                "exit tier {index} is {:?}, not pending",
                tranche.status
            )));
        }
        let quantity = quantity.min(self.open_quantity);
        tranche.status = TrancheStatus::Filled;
        tranche.fill_price = Some(price);
        tranche.filled_qty = quantity;
        tranche.filled_at = Some(now);
        tranche.last_error = None;

        let pnl = (price.inner() - avg.inner()) * quantity.inner() * self.side.sign();
        self.realized_pnl += pnl;
        self.open_quantity = self.open_quantity - quantity;
        self.updated_at = now;

        // Once profit is being taken, no more size is added.
        self.cancel_pending(TrancheKind::Entry);

        match index {
            0 => self.ratchet(StopLevel {
                price: avg,
                stage: StopStage::Breakeven,
            }),
            1 => {
                let tier1_level = self.exits[0].trigger.level();
                self.ratchet(StopLevel {
                    price: tier1_level,
                    stage: StopStage::LockTier1,
                })
            }
            _ => false,
        };

        if !self.open_quantity.is_positive() {
            self.close(CloseReason::ExitLadderComplete, now);
        } else {
            self.refresh_status();
        }

        debug!(
            position = %self.id,
            tier = index,
            price = %price,
            pnl = %pnl,
            remaining = %self.open_quantity,
            "Exit filled"
        );
        Ok(pnl)
    }

    /// Exit the remaining quantity at the stop. Returns realized P&L of the fill.
    pub fn apply_stop_fill(
        &mut self,
        price: Price,
        now: DateTime<Utc>,
    ) -> PositionResult<Decimal> {
        let avg = self.avg_entry_price.ok_or_else(|| {
            PositionError::InvalidState(format!("{} has no filled entries", self.id))
        })?;
        let quantity = self.open_quantity;
        let pnl = (price.inner() - avg.inner()) * quantity.inner() * self.side.sign();
        self.realized_pnl += pnl;
        self.open_quantity = Size::ZERO;
        self.cancel_pending(TrancheKind::Entry);
        self.cancel_pending(TrancheKind::Exit);
        self.close(CloseReason::StopLoss, now);

        info!(
            position = %self.id,
            symbol = %self.symbol,
            price = %price,
            pnl = %pnl,
            total_pnl = %self.realized_pnl,
            "Stop loss filled"
        );
        Ok(pnl)
    }

    /// Count a failed placement attempt on a tranche.
    pub fn record_attempt_failure(&mut self, kind: TrancheKind, index: usize, error: &str) {
        let tranches = match kind {
            TrancheKind::Entry => &mut self.entries,
            TrancheKind::Exit => &mut self.exits,
        };
        if let Some(t) = tranches.get_mut(index) {
            t.attempts += 1;
            t.last_error = Some(error.to_string());
        }
    }

    /// Give up on an entry tranche. The rest of the ladder carries on.
    pub fn skip_entry(&mut self, index: usize, now: DateTime<Utc>) {
        if let Some(t) = self.entries.get_mut(index) {
            if t.is_pending() {
                t.status = TrancheStatus::Skipped;
            }
        }
        self.updated_at = now;
        self.settle_entries(now);
    }

    /// Cancel entries that have rested longer than `timeout_secs`.
    ///
    /// Returns the number cancelled. A ladder that never filled is closed.
    pub fn expire_entries(&mut self, now: DateTime<Utc>, timeout_secs: i64) -> usize {
        if self.is_closed() || (now - self.opened_at).num_seconds() < timeout_secs {
            return 0;
        }
        let cancelled = self.cancel_pending(TrancheKind::Entry);
        if cancelled > 0 {
            self.updated_at = now;
            self.settle_entries(now);
        }
        cancelled
    }

    pub fn flag_attention(&mut self, reason: String, now: DateTime<Utc>) {
        self.needs_attention = true;
        self.attention_reason = Some(reason);
        self.updated_at = now;
    }

    pub fn clear_attention(&mut self) {
        self.needs_attention = false;
        self.attention_reason = None;
    }

    /// Update unrealized P&L at `price`.
    pub fn mark(&mut self, price: Price) {
        self.last_price = Some(price);
        self.unrealized_pnl = match self.avg_entry_price {
            Some(avg) => (price.inner() - avg.inner()) * self.open_quantity.inner() * self.side.sign(),
            None => Decimal::ZERO,
        };
    }

    /// Notional this position holds against the exposure ceiling: resting
    /// entries plus held quantity, valued at the reference price.
    pub fn exposure(&self) -> Decimal {
        if self.is_closed() {
            return Decimal::ZERO;
        }
        let pending: Size = self
            .entries
            .iter()
            .filter(|t| t.is_pending())
            .fold(Size::ZERO, |acc, t| acc + t.quantity);
        (pending + self.open_quantity).notional(self.reference_price)
    }

    /// Move the stop. Refuses anything looser than the current level.
    ///
    /// Returns whether the stop changed.
    pub fn ratchet(&mut self, proposed: StopLevel) -> bool {
        let tighter = match self.stop {
            None => true,
            Some(current) => match self.side {
                Side::Long => proposed.price > current.price,
                Side::Short => proposed.price < current.price,
            },
        };
        if !tighter {
            return false;
        }
        debug!(
            position = %self.id,
            from = ?self.stop.map(|s| s.price.to_string()),
            to = %proposed.price,
            stage = ?proposed.stage,
            "Stop ratcheted"
        );
        self.stop = Some(proposed);
        true
    }

    fn recompute_average_entry(&mut self) {
        let (qty, cost) = self
            .entries
            .iter()
            .filter(|t| t.is_filled())
            .fold((Decimal::ZERO, Decimal::ZERO), |(q, c), t| {
                let px = t.fill_price.map(|p| p.inner()).unwrap_or_default();
                (q + t.filled_qty.inner(), c + t.filled_qty.inner() * px)
            });
        self.avg_entry_price = if qty > Decimal::ZERO {
            Some(Price::new(cost / qty))
        } else {
            None
        };
    }

    /// Re-anchor exit levels and quantities to the current average entry.
    /// Only valid before any exit has filled.
    fn rearm_exits(&mut self) {
        let Some(avg) = self.avg_entry_price else {
            return;
        };
        if self.exits.iter().any(Tranche::is_filled) {
            return;
        }
        let total = self.entered_quantity;
        let side = self.side;
        let last = self.exits.len().saturating_sub(1);
        let mut allocated = Size::ZERO;
        for (i, tranche) in self.exits.iter_mut().enumerate() {
            let level = avg.offset_pct(tranche.offset_pct * side.sign());
            tranche.trigger = TriggerCondition::favorable(side, level);
            tranche.quantity = if i == last {
                total - allocated
            } else {
                total * tranche.fraction
            };
            allocated = allocated + tranche.quantity;
        }
    }

    /// While still on the initial stage, move the stop with the average entry
    /// as long as that tightens it.
    ///
    /// The stop never loosens, so once deeper entry tiers pull the average
    /// toward it the distance from the average to the stop is smaller than
    /// `stop_distance_pct`.
    fn refresh_initial_stop(&mut self) {
        let Some(avg) = self.avg_entry_price else {
            return;
        };
        if matches!(self.stop, Some(s) if s.stage != StopStage::Initial) {
            return;
        }
        let price = avg.offset_pct(-self.stop_distance_pct * self.side.sign());
        self.ratchet(StopLevel {
            price,
            stage: StopStage::Initial,
        });
    }

    fn cancel_pending(&mut self, kind: TrancheKind) -> usize {
        let tranches = match kind {
            TrancheKind::Entry => &mut self.entries,
            TrancheKind::Exit => &mut self.exits,
        };
        let mut count = 0;
        for t in tranches.iter_mut().filter(|t| t.is_pending()) {
            t.status = TrancheStatus::Cancelled;
            count += 1;
        }
        count
    }

    /// After entries were skipped or cancelled: close an unfilled ladder,
    /// otherwise recompute status.
    fn settle_entries(&mut self, now: DateTime<Utc>) {
        let any_pending = self.entries.iter().any(Tranche::is_pending);
        if !any_pending && self.entered_quantity.is_zero() {
            self.cancel_pending(TrancheKind::Exit);
            self.close(CloseReason::EntryExpired, now);
        } else {
            self.refresh_status();
        }
    }

    fn refresh_status(&mut self) {
        if self.is_closed() {
            return;
        }
        let any_entry_filled = self.entries.iter().any(Tranche::is_filled);
        let any_entry_pending = self.entries.iter().any(Tranche::is_pending);
        let any_exit_filled = self.exits.iter().any(Tranche::is_filled);

        self.status = if any_exit_filled {
            PositionStatus::Closing
        } else if !any_entry_filled {
            PositionStatus::Pending
        } else if any_entry_pending {
            PositionStatus::PartiallyFilled
        } else {
            PositionStatus::Open
        };
    }

    fn close(&mut self, reason: CloseReason, now: DateTime<Utc>) {
        self.status = PositionStatus::Closed;
        self.close_reason = Some(reason);
        self.closed_at = Some(now);
        self.updated_at = now;
        self.unrealized_pnl = Decimal::ZERO;
        info!(
            position = %self.id,
            symbol = %self.symbol,
            reason = ?reason,
            realized_pnl = %self.realized_pnl,
            "Position closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use tgate_core::{SignalAttributes, TechnicalFlags};

    fn candidate(side: Side) -> TradeCandidate {
        TradeCandidate {
            id: "c-1".to_string(),
            symbol: "SOL".to_string(),
            side,
            notional: dec!(1000),
            reference_price: Price::new(dec!(100)),
            stop_distance_pct: dec!(5),
            attributes: SignalAttributes {
                confidence: dec!(0.9),
                source_id: "desk".to_string(),
                technical: TechnicalFlags::default(),
                market_condition: dec!(0.5),
                momentum_pct: Decimal::ZERO,
            },
        }
    }

    fn plan(side: Side) -> Position {
        Position::plan(
            &candidate(side),
            dec!(1000),
            dec!(5),
            &LadderConfig::default(),
            Utc::now(),
        )
        .unwrap()
    }

    fn fill_entry(p: &mut Position, i: usize) {
        let price = p.entries[i].trigger.level();
        let qty = p.entries[i].quantity;
        p.apply_entry_fill(i, price, qty, Utc::now()).unwrap();
    }

    fn fill_exit(p: &mut Position, i: usize) -> Decimal {
        let price = p.exits[i].trigger.level();
        let qty = p.exits[i].quantity;
        p.apply_exit_fill(i, price, qty, Utc::now()).unwrap()
    }

    #[test]
    fn test_plan_long_ladder_levels() {
        let p = plan(Side::Long);
        assert_eq!(p.status, PositionStatus::Pending);
        assert_eq!(p.planned_quantity.inner(), dec!(10));
        let levels: Vec<Decimal> = p.entries.iter().map(|t| t.trigger.level().inner()).collect();
        assert_eq!(levels, vec![dec!(100), dec!(99), dec!(98), dec!(97)]);
        assert_eq!(p.entries[0].quantity.inner(), dec!(4));
        assert!(matches!(p.entries[1].trigger, TriggerCondition::AtOrBelow(_)));
        assert!(p.check_fractions().is_ok());
    }

    #[test]
    fn test_plan_short_ladder_mirrors() {
        let p = plan(Side::Short);
        let levels: Vec<Decimal> = p.entries.iter().map(|t| t.trigger.level().inner()).collect();
        assert_eq!(levels, vec![dec!(100), dec!(101), dec!(102), dec!(103)]);
        assert!(matches!(p.entries[0].trigger, TriggerCondition::AtOrAbove(_)));
        assert!(matches!(p.exits[0].trigger, TriggerCondition::AtOrBelow(_)));
    }

    #[test]
    fn test_average_entry_uses_filled_tranches_only() {
        let mut p = plan(Side::Long);
        fill_entry(&mut p, 0); // 4 @ 100
        fill_entry(&mut p, 1); // 3 @ 99
        // (400 + 297) / 7
        assert_eq!(
            p.avg_entry_price.unwrap().inner().round_dp(8),
            dec!(99.57142857)
        );
        assert_eq!(p.status, PositionStatus::PartiallyFilled);
        assert_eq!(p.open_quantity.inner(), dec!(7));
    }

    #[test]
    fn test_exits_anchor_to_average_entry() {
        let mut p = plan(Side::Long);
        fill_entry(&mut p, 0);
        assert_eq!(p.exits[0].trigger.level().inner(), dec!(109));
        assert_eq!(p.exits[3].trigger.level().inner(), dec!(137));
        let total: Decimal = p.exits.iter().map(|t| t.quantity.inner()).sum();
        assert_eq!(total, dec!(4));
        assert!(p.check_fractions().is_ok());
    }

    #[test]
    fn test_stop_ratchet_sequence() {
        let mut p = plan(Side::Long);
        fill_entry(&mut p, 0);
        let initial = p.stop.unwrap();
        assert_eq!(initial.stage, StopStage::Initial);
        assert_eq!(initial.price.inner(), dec!(95));

        // Deeper fill lowers the average; the stop must not loosen.
        fill_entry(&mut p, 1);
        assert_eq!(p.stop.unwrap().price, initial.price);

        let avg = p.avg_entry_price.unwrap();
        fill_exit(&mut p, 0);
        let be = p.stop.unwrap();
        assert_eq!(be.stage, StopStage::Breakeven);
        assert_eq!(be.price, avg);
        assert_eq!(p.status, PositionStatus::Closing);

        let tier1 = p.exits[0].trigger.level();
        fill_exit(&mut p, 1);
        let lock = p.stop.unwrap();
        assert_eq!(lock.stage, StopStage::LockTier1);
        assert_eq!(lock.price, tier1);
        assert!(lock.price > be.price);
    }

    #[test]
    fn test_deeper_fills_shrink_effective_stop_distance() {
        let distance = |p: &Position| {
            let avg = p.avg_entry_price.unwrap().inner();
            let stop = p.stop.unwrap().price.inner();
            (avg - stop).abs() / avg * dec!(100)
        };

        let mut long = plan(Side::Long);
        fill_entry(&mut long, 0);
        assert_eq!(distance(&long), dec!(5));
        fill_entry(&mut long, 1);
        assert_eq!(long.stop.unwrap().price.inner(), dec!(95));
        assert_eq!(long.stop.unwrap().stage, StopStage::Initial);
        let after_two = distance(&long);
        assert!(after_two < dec!(5));
        assert!(after_two > dec!(4.5));

        fill_entry(&mut long, 2);
        fill_entry(&mut long, 3);
        assert_eq!(long.stop.unwrap().price.inner(), dec!(95));
        assert!(distance(&long) < after_two);

        let mut short = plan(Side::Short);
        fill_entry(&mut short, 0);
        fill_entry(&mut short, 1);
        assert_eq!(short.stop.unwrap().price.inner(), dec!(105));
        assert!(distance(&short) < dec!(5));
    }

    #[test]
    fn test_ratchet_refuses_looser_stop() {
        let mut p = plan(Side::Short);
        fill_entry(&mut p, 0);
        let current = p.stop.unwrap();
        assert_eq!(current.price.inner(), dec!(105));
        assert!(!p.ratchet(StopLevel {
            price: Price::new(dec!(107)),
            stage: StopStage::Breakeven,
        }));
        assert!(p.ratchet(StopLevel {
            price: Price::new(dec!(100)),
            stage: StopStage::Breakeven,
        }));
    }

    #[test]
    fn test_full_exit_ladder_closes() {
        let mut p = plan(Side::Long);
        for i in 0..4 {
            fill_entry(&mut p, i);
        }
        assert_eq!(p.status, PositionStatus::Open);

        let mut total = Decimal::ZERO;
        for i in 0..4 {
            total += fill_exit(&mut p, i);
        }
        assert!(p.is_closed());
        assert_eq!(p.close_reason, Some(CloseReason::ExitLadderComplete));
        assert_eq!(p.realized_pnl, total);
        assert!(total > Decimal::ZERO);
        assert_eq!(p.exposure(), Decimal::ZERO);
    }

    #[test]
    fn test_exit_fill_cancels_pending_entries() {
        let mut p = plan(Side::Long);
        fill_entry(&mut p, 0);
        fill_exit(&mut p, 0);
        assert!(p
            .entries
            .iter()
            .skip(1)
            .all(|t| t.status == TrancheStatus::Cancelled));
        assert!(p.triggered_entries(Price::new(dec!(90))).is_empty());
    }

    #[test]
    fn test_stop_fill_closes_with_loss() {
        let mut p = plan(Side::Long);
        fill_entry(&mut p, 0);
        assert!(p.stop_triggered(Price::new(dec!(94.5))));
        assert!(!p.stop_triggered(Price::new(dec!(96))));

        let pnl = p.apply_stop_fill(Price::new(dec!(95)), Utc::now()).unwrap();
        assert_eq!(pnl, dec!(-20));
        assert!(p.is_closed());
        assert_eq!(p.close_reason, Some(CloseReason::StopLoss));
        assert!(p.exits.iter().all(|t| t.status == TrancheStatus::Cancelled));
    }

    #[test]
    fn test_skipped_entries_keep_partial_ladder() {
        let mut p = plan(Side::Long);
        fill_entry(&mut p, 0);
        p.skip_entry(1, Utc::now());
        p.skip_entry(2, Utc::now());
        p.skip_entry(3, Utc::now());
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(p.entries[1].status, TrancheStatus::Skipped);
        assert!(p.check_fractions().is_ok());
    }

    #[test]
    fn test_expired_unfilled_ladder_closes() {
        let mut p = plan(Side::Long);
        let later = p.opened_at + Duration::seconds(14_400);
        assert_eq!(p.expire_entries(p.opened_at + Duration::seconds(10), 14_400), 0);
        assert_eq!(p.expire_entries(later, 14_400), 4);
        assert!(p.is_closed());
        assert_eq!(p.close_reason, Some(CloseReason::EntryExpired));
        assert_eq!(p.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_exposure_counts_resting_and_held() {
        let mut p = plan(Side::Long);
        assert_eq!(p.exposure(), dec!(1000));
        fill_entry(&mut p, 0);
        assert_eq!(p.exposure(), dec!(1000));
        p.skip_entry(3, Utc::now());
        assert_eq!(p.exposure(), dec!(900));
    }

    #[test]
    fn test_mark_unrealized() {
        let mut p = plan(Side::Short);
        fill_entry(&mut p, 0); // short 4 @ 100
        p.mark(Price::new(dec!(98)));
        assert_eq!(p.unrealized_pnl, dec!(8));
        assert_eq!(p.last_price, Some(Price::new(dec!(98))));
    }

    #[test]
    fn test_refill_of_non_pending_is_rejected() {
        let mut p = plan(Side::Long);
        fill_entry(&mut p, 0);
        let err = p.apply_entry_fill(0, Price::new(dec!(100)), Size::new(dec!(4)), Utc::now());
        assert!(matches!(err, Err(PositionError::InvalidState(_))));
    }

    #[test]
    fn test_position_serde_keeps_fill_history() {
        let mut p = plan(Side::Long);
        fill_entry(&mut p, 0);
        let json = serde_json::to_string(&p).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(back.entries[0].is_filled());
    }
}
