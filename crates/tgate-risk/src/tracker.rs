//! Rolling risk counters owned by the loop controller.
//!
//! `TrackerState` is a plain value: the controller holds the only mutable
//! reference for the length of a cycle and persists it afterwards.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// UTC hour at which the daily window (and, on Mondays, the weekly window) rolls.
    #[serde(default)]
    pub daily_reset_hour_utc: u32,
    /// Session equity at start. Drawdown is measured against the running peak.
    #[serde(default = "default_starting_equity")]
    pub starting_equity: Decimal,
}

fn default_starting_equity() -> Decimal {
    Decimal::from(10_000)
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            daily_reset_hour_utc: 0,
            starting_equity: default_starting_equity(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.daily_reset_hour_utc > 23 {
            return Err(format!(
                "daily_reset_hour_utc ({}) must be within 0..=23",
                self.daily_reset_hour_utc
            ));
        }
        if self.starting_equity <= Decimal::ZERO {
            return Err(format!(
                "starting_equity ({}) must be positive",
                self.starting_equity
            ));
        }
        Ok(())
    }
}

/// Which windows were reset by [`TrackerState::roll_boundaries`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rollover {
    pub daily: bool,
    pub weekly: bool,
}

/// Start of the daily window containing `now`.
fn day_start(now: DateTime<Utc>, reset_hour: u32) -> DateTime<Utc> {
    let boundary = NaiveTime::from_hms_opt(reset_hour.min(23), 0, 0).unwrap_or_default();
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(boundary));
    if today > now {
        today - Duration::days(1)
    } else {
        today
    }
}

/// Start of the weekly window containing `now` (Monday at the reset hour).
fn week_start(now: DateTime<Utc>, reset_hour: u32) -> DateTime<Utc> {
    let day = day_start(now, reset_hour);
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

/// Process-wide risk counters.
///
/// Losses are net of wins inside their window: `daily_loss` is
/// `max(0, -daily_realized_pnl)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    pub daily_realized_pnl: Decimal,
    pub weekly_realized_pnl: Decimal,
    pub daily_loss: Decimal,
    pub weekly_loss: Decimal,
    pub consecutive_losses: u32,
    /// Starting equity plus realized P&L for this session.
    pub session_equity: Decimal,
    /// Unrealized P&L of open positions at the last mark.
    pub unrealized_pnl: Decimal,
    pub session_peak_equity: Decimal,
    /// Peak-to-current decline at the last update, in percent.
    pub current_drawdown_pct: Decimal,
    /// Deepest drawdown seen this session. Only a session restart lowers it.
    pub session_drawdown_pct: Decimal,
    pub open_position_count: u32,
    pub aggregate_exposure: Decimal,
    pub daily_trade_count: u32,
    pub day_anchor: DateTime<Utc>,
    pub week_anchor: DateTime<Utc>,
    pub session_started_at: DateTime<Utc>,
}

impl TrackerState {
    pub fn new(config: &TrackerConfig, now: DateTime<Utc>) -> Self {
        Self {
            daily_realized_pnl: Decimal::ZERO,
            weekly_realized_pnl: Decimal::ZERO,
            daily_loss: Decimal::ZERO,
            weekly_loss: Decimal::ZERO,
            consecutive_losses: 0,
            session_equity: config.starting_equity,
            unrealized_pnl: Decimal::ZERO,
            session_peak_equity: config.starting_equity,
            current_drawdown_pct: Decimal::ZERO,
            session_drawdown_pct: Decimal::ZERO,
            open_position_count: 0,
            aggregate_exposure: Decimal::ZERO,
            daily_trade_count: 0,
            day_anchor: day_start(now, config.daily_reset_hour_utc),
            week_anchor: week_start(now, config.daily_reset_hour_utc),
            session_started_at: now,
        }
    }

    /// Reset the daily and weekly windows if `now` crossed their boundaries.
    pub fn roll_boundaries(&mut self, now: DateTime<Utc>, reset_hour: u32) -> Rollover {
        let mut rollover = Rollover::default();

        let day = day_start(now, reset_hour);
        if day > self.day_anchor {
            info!(
                daily_pnl = %self.daily_realized_pnl,
                trades = self.daily_trade_count,
                "Daily window rolled"
            );
            self.daily_realized_pnl = Decimal::ZERO;
            self.daily_loss = Decimal::ZERO;
            self.daily_trade_count = 0;
            self.day_anchor = day;
            rollover.daily = true;
        }

        let week = week_start(now, reset_hour);
        if week > self.week_anchor {
            info!(weekly_pnl = %self.weekly_realized_pnl, "Weekly window rolled");
            self.weekly_realized_pnl = Decimal::ZERO;
            self.weekly_loss = Decimal::ZERO;
            self.week_anchor = week;
            rollover.weekly = true;
        }

        rollover
    }

    /// Book realized P&L from any exit fill (partial or final).
    ///
    /// The amount moves out of the last mark into session equity, so marked
    /// equity and drawdown are untouched until the next [`Self::record_mark`].
    pub fn record_realized(&mut self, pnl: Decimal) {
        self.daily_realized_pnl += pnl;
        self.weekly_realized_pnl += pnl;
        self.daily_loss = (-self.daily_realized_pnl).max(Decimal::ZERO);
        self.weekly_loss = (-self.weekly_realized_pnl).max(Decimal::ZERO);
        self.session_equity += pnl;
        self.unrealized_pnl -= pnl;
    }

    /// Register a fully closed position's total P&L against the loss streak.
    ///
    /// A loss extends the streak, a win resets it, breakeven leaves it alone.
    pub fn record_close(&mut self, total_pnl: Decimal) {
        if total_pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
            debug!(
                streak = self.consecutive_losses,
                pnl = %total_pnl,
                "Losing close"
            );
        } else if total_pnl > Decimal::ZERO {
            if self.consecutive_losses > 0 {
                debug!(previous = self.consecutive_losses, "Loss streak reset by win");
            }
            self.consecutive_losses = 0;
        }
    }

    /// Re-mark unrealized P&L of open positions.
    pub fn record_mark(&mut self, unrealized_pnl: Decimal) {
        self.unrealized_pnl = unrealized_pnl;
        self.recompute_drawdown();
    }

    /// Count an admitted trade against the daily cap.
    pub fn record_admission(&mut self) {
        self.daily_trade_count += 1;
    }

    /// Copy the authoritative open count and exposure from the position book.
    pub fn sync_exposure(&mut self, open_position_count: u32, aggregate_exposure: Decimal) {
        self.open_position_count = open_position_count;
        self.aggregate_exposure = aggregate_exposure;
    }

    /// Start a fresh session. The only way `session_drawdown_pct` resets.
    pub fn restart_session(&mut self, equity: Decimal, now: DateTime<Utc>) {
        info!(equity = %equity, drawdown_pct = %self.session_drawdown_pct, "Session restarted");
        self.session_equity = equity;
        self.unrealized_pnl = Decimal::ZERO;
        self.session_peak_equity = equity;
        self.current_drawdown_pct = Decimal::ZERO;
        self.session_drawdown_pct = Decimal::ZERO;
        self.session_started_at = now;
    }

    /// Equity including unrealized P&L.
    pub fn marked_equity(&self) -> Decimal {
        self.session_equity + self.unrealized_pnl
    }

    fn recompute_drawdown(&mut self) {
        let equity = self.marked_equity();
        if equity > self.session_peak_equity {
            self.session_peak_equity = equity;
        }
        self.current_drawdown_pct = if self.session_peak_equity > Decimal::ZERO {
            ((self.session_peak_equity - equity) / self.session_peak_equity
                * Decimal::ONE_HUNDRED)
                .max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        self.session_drawdown_pct = self.session_drawdown_pct.max(self.current_drawdown_pct);
    }
}
