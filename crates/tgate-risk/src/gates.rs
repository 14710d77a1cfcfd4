//! Layered admission gate.
//!
//! A scored candidate passes through four layers in a fixed order. Each
//! check returns a [`GateResult`]; the first `Reject` ends evaluation and is
//! the reported reason. `Adjust` results multiply into the size multiplier
//! and may widen (never narrow) the stop distance.
//!
//! # Layers
//!
//! 1. Global capital: position size, concurrency, exposure ceiling, daily and
//!    weekly loss limits, stop ceiling. Reject only.
//! 2. Positioning guard: short squeeze protection, funding divergence, OI spike.
//! 3. Market floors: health ratio, data freshness, daily trade cap, loss
//!    streak cool-down, kill switch WARNING caution.
//! 4. Kill switch: reject while admissions are blocked.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use tgate_core::{HealthSnapshot, MarketSnapshot, Observed, ScoredCandidate, Side};

use crate::kill_switch::KillSwitchState;
use crate::tracker::TrackerState;

/// Risk gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskGateConfig {
    /// Maximum notional per position.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,
    #[serde(default = "default_weekly_loss_limit")]
    pub weekly_loss_limit: Decimal,
    /// Widest stop distance allowed, in percent.
    #[serde(default = "default_max_stop_loss_pct")]
    pub max_stop_loss_pct: Decimal,

    /// Short share of open interest (percent) at which shorts are refused.
    #[serde(default = "default_short_squeeze_ratio_pct")]
    pub short_squeeze_ratio_pct: Decimal,
    /// Max-minus-min venue funding rate that counts as divergence.
    #[serde(default = "default_funding_divergence_threshold")]
    pub funding_divergence_threshold: Decimal,
    /// Size factor for the side that pays under divergence.
    #[serde(default = "default_funding_divergence_size_factor")]
    pub funding_divergence_size_factor: Decimal,
    /// Absolute OI change (percent) that counts as a spike.
    #[serde(default = "default_oi_spike_threshold_pct")]
    pub oi_spike_threshold_pct: Decimal,
    #[serde(default = "default_oi_spike_size_factor")]
    pub oi_spike_size_factor: Decimal,
    /// Stop distance floor (percent) applied on an OI spike.
    #[serde(default = "default_oi_spike_min_stop_pct")]
    pub oi_spike_min_stop_pct: Decimal,

    #[serde(default = "default_critical_health_ratio")]
    pub critical_health_ratio: Decimal,
    #[serde(default = "default_warning_health_ratio")]
    pub warning_health_ratio: Decimal,
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    /// Consecutive losses at which new admissions cool down.
    #[serde(default = "default_loss_streak_halt")]
    pub loss_streak_halt: u32,
    /// Age beyond which a stale market snapshot reduces size.
    #[serde(default = "default_max_market_staleness_secs")]
    pub max_market_staleness_secs: i64,
    /// Age beyond which a stale health reading reduces size.
    #[serde(default = "default_max_health_staleness_secs")]
    pub max_health_staleness_secs: i64,
    /// Size factor for data older than its staleness bound.
    #[serde(default = "default_stale_size_factor")]
    pub stale_size_factor: Decimal,
}

fn default_max_position_size() -> Decimal {
    Decimal::from(1000)
}

fn default_max_concurrent_positions() -> u32 {
    3
}

fn default_daily_loss_limit() -> Decimal {
    Decimal::from(300)
}

fn default_weekly_loss_limit() -> Decimal {
    Decimal::from(800)
}

fn default_max_stop_loss_pct() -> Decimal {
    Decimal::from(8)
}

fn default_short_squeeze_ratio_pct() -> Decimal {
    Decimal::from(54)
}

fn default_funding_divergence_threshold() -> Decimal {
    Decimal::new(5, 4) // 0.0005 = 5bp per period
}

fn default_funding_divergence_size_factor() -> Decimal {
    Decimal::new(75, 2)
}

fn default_oi_spike_threshold_pct() -> Decimal {
    Decimal::from(3)
}

fn default_oi_spike_size_factor() -> Decimal {
    Decimal::new(8, 1)
}

fn default_oi_spike_min_stop_pct() -> Decimal {
    Decimal::from(6)
}

fn default_critical_health_ratio() -> Decimal {
    Decimal::from(2)
}

fn default_warning_health_ratio() -> Decimal {
    Decimal::new(220, 2)
}

fn default_max_daily_trades() -> u32 {
    10
}

fn default_loss_streak_halt() -> u32 {
    3
}

fn default_max_market_staleness_secs() -> i64 {
    900
}

fn default_max_health_staleness_secs() -> i64 {
    14_400
}

fn default_stale_size_factor() -> Decimal {
    Decimal::new(5, 1)
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            max_concurrent_positions: default_max_concurrent_positions(),
            daily_loss_limit: default_daily_loss_limit(),
            weekly_loss_limit: default_weekly_loss_limit(),
            max_stop_loss_pct: default_max_stop_loss_pct(),
            short_squeeze_ratio_pct: default_short_squeeze_ratio_pct(),
            funding_divergence_threshold: default_funding_divergence_threshold(),
            funding_divergence_size_factor: default_funding_divergence_size_factor(),
            oi_spike_threshold_pct: default_oi_spike_threshold_pct(),
            oi_spike_size_factor: default_oi_spike_size_factor(),
            oi_spike_min_stop_pct: default_oi_spike_min_stop_pct(),
            critical_health_ratio: default_critical_health_ratio(),
            warning_health_ratio: default_warning_health_ratio(),
            max_daily_trades: default_max_daily_trades(),
            loss_streak_halt: default_loss_streak_halt(),
            max_market_staleness_secs: default_max_market_staleness_secs(),
            max_health_staleness_secs: default_max_health_staleness_secs(),
            stale_size_factor: default_stale_size_factor(),
        }
    }
}

impl RiskGateConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_position_size <= Decimal::ZERO {
            return Err(format!(
                "max_position_size ({}) must be positive",
                self.max_position_size
            ));
        }
        if self.max_concurrent_positions == 0 {
            return Err("max_concurrent_positions must be at least 1".to_string());
        }
        if self.daily_loss_limit <= Decimal::ZERO || self.weekly_loss_limit <= Decimal::ZERO {
            return Err("loss limits must be positive".to_string());
        }
        if self.weekly_loss_limit < self.daily_loss_limit {
            return Err(format!(
                "weekly_loss_limit ({}) must not be below daily_loss_limit ({})",
                self.weekly_loss_limit, self.daily_loss_limit
            ));
        }
        if self.max_stop_loss_pct <= Decimal::ZERO || self.max_stop_loss_pct >= Decimal::ONE_HUNDRED
        {
            return Err(format!(
                "max_stop_loss_pct ({}) must be within (0, 100)",
                self.max_stop_loss_pct
            ));
        }
        for (name, factor) in [
            (
                "funding_divergence_size_factor",
                self.funding_divergence_size_factor,
            ),
            ("oi_spike_size_factor", self.oi_spike_size_factor),
            ("stale_size_factor", self.stale_size_factor),
        ] {
            if factor <= Decimal::ZERO || factor > Decimal::ONE {
                return Err(format!("{name} ({factor}) must be within (0, 1]"));
            }
        }
        if self.oi_spike_min_stop_pct > self.max_stop_loss_pct {
            return Err(format!(
                "oi_spike_min_stop_pct ({}) must not exceed max_stop_loss_pct ({})",
                self.oi_spike_min_stop_pct, self.max_stop_loss_pct
            ));
        }
        if self.warning_health_ratio < self.critical_health_ratio {
            return Err(format!(
                "warning_health_ratio ({}) must not be below critical_health_ratio ({})",
                self.warning_health_ratio, self.critical_health_ratio
            ));
        }
        if self.max_daily_trades == 0 || self.loss_streak_halt == 0 {
            return Err("max_daily_trades and loss_streak_halt must be at least 1".to_string());
        }
        if self.max_market_staleness_secs < 0 || self.max_health_staleness_secs < 0 {
            return Err("staleness bounds must be non-negative".to_string());
        }
        Ok(())
    }

    /// Ceiling on aggregate exposure.
    pub fn max_aggregate_exposure(&self) -> Decimal {
        Decimal::from(self.max_concurrent_positions) * self.max_position_size
    }

    /// Classify a health reading against the floors and staleness bound.
    pub fn classify_health(
        &self,
        health: Option<&Observed<HealthSnapshot>>,
        now: DateTime<Utc>,
    ) -> HealthLevel {
        let Some(obs) = health else {
            return HealthLevel::Unavailable;
        };
        let Some(ratio) = obs.value.ratio else {
            return HealthLevel::Untracked;
        };
        if ratio < self.critical_health_ratio {
            return HealthLevel::Critical(ratio);
        }
        let age_secs = obs.age_secs(now);
        if obs.stale && age_secs > self.max_health_staleness_secs {
            return HealthLevel::Stale { age_secs };
        }
        if ratio < self.warning_health_ratio {
            return HealthLevel::Warning(ratio);
        }
        HealthLevel::Healthy
    }
}

/// Health reading as seen by the kill switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    /// Nothing leveraged is tracked.
    Untracked,
    Healthy,
    Warning(Decimal),
    Critical(Decimal),
    /// Fallback value older than the staleness bound.
    Stale { age_secs: i64 },
    /// Never fetched.
    Unavailable,
}

/// Policy layer, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateLayer {
    GlobalCapital,
    PositioningGuard,
    MarketFloor,
    KillSwitch,
}

impl GateLayer {
    pub const ORDER: [GateLayer; 4] = [
        GateLayer::GlobalCapital,
        GateLayer::PositioningGuard,
        GateLayer::MarketFloor,
        GateLayer::KillSwitch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlobalCapital => "global_capital",
            Self::PositioningGuard => "positioning_guard",
            Self::MarketFloor => "market_floor",
            Self::KillSwitch => "kill_switch",
        }
    }
}

impl std::fmt::Display for GateLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single check.
#[derive(Debug, Clone, PartialEq)]
pub enum GateResult {
    Pass,
    Reject(String),
    /// Continue with a size factor in (0, 1] and an optional stop floor.
    /// A factor of 1 with no floor is a cautionary note.
    Adjust {
        size_factor: Decimal,
        min_stop_pct: Option<Decimal>,
        reason: String,
    },
}

impl GateResult {
    fn caution(reason: String) -> Self {
        Self::Adjust {
            size_factor: Decimal::ONE,
            min_stop_pct: None,
            reason,
        }
    }

    fn resize(size_factor: Decimal, reason: String) -> Self {
        Self::Adjust {
            size_factor,
            min_stop_pct: None,
            reason,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject(_))
    }
}

/// Outcome of gating one candidate. Lives for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub candidate_id: String,
    pub symbol: String,
    pub side: Side,
    pub approved: bool,
    /// Cumulative size multiplier in (0, 1].
    pub size_multiplier: Decimal,
    /// Final stop distance in percent.
    pub stop_distance_pct: Decimal,
    /// Proposed notional times multiplier; zero when rejected.
    pub approved_notional: Decimal,
    /// Adjustment and rejection reasons in evaluation order.
    pub reasons: Vec<String>,
    pub rejected_by: Option<GateLayer>,
}

/// Already-fetched state the gate evaluates against.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub tracker: &'a TrackerState,
    pub kill_switch: KillSwitchState,
    pub market: Option<&'a Observed<MarketSnapshot>>,
    pub health: Option<&'a Observed<HealthSnapshot>>,
    pub now: DateTime<Utc>,
}

struct Accumulator<'c> {
    candidate: &'c ScoredCandidate,
    size_multiplier: Decimal,
    stop_distance_pct: Decimal,
    reasons: Vec<String>,
}

impl<'c> Accumulator<'c> {
    fn new(candidate: &'c ScoredCandidate) -> Self {
        Self {
            candidate,
            size_multiplier: Decimal::ONE,
            stop_distance_pct: candidate.candidate.stop_distance_pct,
            reasons: Vec::new(),
        }
    }

    fn decision(self, rejected_by: Option<GateLayer>) -> RiskDecision {
        let approved = rejected_by.is_none();
        let c = &self.candidate.candidate;
        RiskDecision {
            candidate_id: c.id.clone(),
            symbol: c.symbol.clone(),
            side: c.side,
            approved,
            size_multiplier: self.size_multiplier,
            stop_distance_pct: self.stop_distance_pct,
            approved_notional: if approved {
                c.notional * self.size_multiplier
            } else {
                Decimal::ZERO
            },
            reasons: self.reasons,
            rejected_by,
        }
    }
}

/// Four-layer admission gate.
pub struct RiskGate {
    config: RiskGateConfig,
}

impl RiskGate {
    pub fn new(config: RiskGateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskGateConfig {
        &self.config
    }

    /// Evaluate a candidate. Pure: no I/O and no clock reads.
    pub fn evaluate(&self, candidate: &ScoredCandidate, ctx: &GateContext<'_>) -> RiskDecision {
        let mut acc = Accumulator::new(candidate);

        for layer in GateLayer::ORDER {
            for result in self.run_layer(layer, candidate, ctx) {
                match result {
                    GateResult::Pass => {}
                    GateResult::Reject(reason) => {
                        trace!(
                            candidate = %candidate.id(),
                            layer = %layer,
                            reason = %reason,
                            "Gate rejected"
                        );
                        acc.reasons.push(format!("{layer}: {reason}"));
                        let decision = acc.decision(Some(layer));
                        debug!(
                            candidate = %decision.candidate_id,
                            symbol = %decision.symbol,
                            layer = %layer,
                            "Candidate rejected"
                        );
                        return decision;
                    }
                    GateResult::Adjust {
                        size_factor,
                        min_stop_pct,
                        reason,
                    } => {
                        trace!(
                            candidate = %candidate.id(),
                            layer = %layer,
                            size_factor = %size_factor,
                            reason = %reason,
                            "Gate adjusted"
                        );
                        acc.size_multiplier *= size_factor;
                        if let Some(floor) = min_stop_pct {
                            let widened = acc
                                .stop_distance_pct
                                .max(floor.min(self.config.max_stop_loss_pct));
                            acc.stop_distance_pct = widened;
                        }
                        acc.reasons.push(format!("{layer}: {reason}"));
                    }
                }
            }
        }

        let decision = acc.decision(None);
        debug!(
            candidate = %decision.candidate_id,
            symbol = %decision.symbol,
            multiplier = %decision.size_multiplier,
            stop_pct = %decision.stop_distance_pct,
            "Candidate approved"
        );
        decision
    }

    fn run_layer(
        &self,
        layer: GateLayer,
        candidate: &ScoredCandidate,
        ctx: &GateContext<'_>,
    ) -> Vec<GateResult> {
        match layer {
            GateLayer::GlobalCapital => vec![
                self.check_position_size(candidate),
                self.check_concurrency(ctx.tracker),
                self.check_exposure(candidate, ctx.tracker),
                self.check_loss_limits(ctx.tracker),
                self.check_stop_ceiling(candidate),
            ],
            GateLayer::PositioningGuard => match ctx.market {
                Some(market) => vec![
                    self.check_short_squeeze(candidate.side(), &market.value),
                    self.check_funding_divergence(candidate.side(), &market.value),
                    self.check_oi_spike(&market.value),
                ],
                None => Vec::new(),
            },
            GateLayer::MarketFloor => vec![
                self.check_health(ctx.health, ctx.now),
                self.check_market_data(candidate.symbol(), ctx.market, ctx.now),
                self.check_trade_cap(ctx.tracker),
                self.check_loss_streak(ctx.tracker),
                self.check_warning_state(ctx.kill_switch),
            ],
            GateLayer::KillSwitch => vec![self.check_kill_switch(ctx.kill_switch)],
        }
    }

    // ---- Layer 1: global capital ----

    pub fn check_position_size(&self, candidate: &ScoredCandidate) -> GateResult {
        let notional = candidate.candidate.notional;
        if notional > self.config.max_position_size {
            return GateResult::Reject(format!(
                "proposed size {notional} exceeds max position size {}",
                self.config.max_position_size
            ));
        }
        GateResult::Pass
    }

    pub fn check_concurrency(&self, tracker: &TrackerState) -> GateResult {
        if tracker.open_position_count >= self.config.max_concurrent_positions {
            return GateResult::Reject(format!(
                "{} open positions >= max {}",
                tracker.open_position_count, self.config.max_concurrent_positions
            ));
        }
        GateResult::Pass
    }

    /// Keeps aggregate exposure within `max_concurrent_positions * max_position_size`.
    pub fn check_exposure(&self, candidate: &ScoredCandidate, tracker: &TrackerState) -> GateResult {
        let ceiling = self.config.max_aggregate_exposure();
        let after = tracker.aggregate_exposure + candidate.candidate.notional;
        if after > ceiling {
            return GateResult::Reject(format!(
                "aggregate exposure {after} would exceed ceiling {ceiling}"
            ));
        }
        GateResult::Pass
    }

    pub fn check_loss_limits(&self, tracker: &TrackerState) -> GateResult {
        if tracker.daily_loss >= self.config.daily_loss_limit {
            return GateResult::Reject(format!(
                "daily loss {} >= limit {}",
                tracker.daily_loss, self.config.daily_loss_limit
            ));
        }
        if tracker.weekly_loss >= self.config.weekly_loss_limit {
            return GateResult::Reject(format!(
                "weekly loss {} >= limit {}",
                tracker.weekly_loss, self.config.weekly_loss_limit
            ));
        }
        GateResult::Pass
    }

    pub fn check_stop_ceiling(&self, candidate: &ScoredCandidate) -> GateResult {
        let stop = candidate.candidate.stop_distance_pct;
        if stop > self.config.max_stop_loss_pct {
            return GateResult::Reject(format!(
                "stop distance {stop}% exceeds max {}%",
                self.config.max_stop_loss_pct
            ));
        }
        GateResult::Pass
    }

    // ---- Layer 2: positioning guard ----

    pub fn check_short_squeeze(&self, side: Side, market: &MarketSnapshot) -> GateResult {
        if side == Side::Short && market.short_ratio_pct >= self.config.short_squeeze_ratio_pct {
            return GateResult::Reject(format!(
                "short ratio {}% >= {}% (squeeze protection)",
                market.short_ratio_pct, self.config.short_squeeze_ratio_pct
            ));
        }
        GateResult::Pass
    }

    /// Under divergence, the side that pays funding on average is resized;
    /// the side that collects passes with a note.
    pub fn check_funding_divergence(&self, side: Side, market: &MarketSnapshot) -> GateResult {
        let Some(divergence) = market.funding_divergence() else {
            return GateResult::Pass;
        };
        if divergence <= self.config.funding_divergence_threshold {
            return GateResult::Pass;
        }

        let average = market.average_funding().unwrap_or(Decimal::ZERO);
        let favored = if average > Decimal::ZERO {
            Some(Side::Short)
        } else if average < Decimal::ZERO {
            Some(Side::Long)
        } else {
            None
        };

        if favored == Some(side) {
            return GateResult::caution(format!(
                "funding divergence {divergence} favors {side}"
            ));
        }
        GateResult::resize(
            self.config.funding_divergence_size_factor,
            format!(
                "funding divergence {divergence} > {} against {side}",
                self.config.funding_divergence_threshold
            ),
        )
    }

    pub fn check_oi_spike(&self, market: &MarketSnapshot) -> GateResult {
        let change = market.oi_change_pct.abs();
        if change > self.config.oi_spike_threshold_pct {
            return GateResult::Adjust {
                size_factor: self.config.oi_spike_size_factor,
                min_stop_pct: Some(self.config.oi_spike_min_stop_pct),
                reason: format!(
                    "open interest change {}% > {}% spike threshold",
                    market.oi_change_pct, self.config.oi_spike_threshold_pct
                ),
            };
        }
        GateResult::Pass
    }

    // ---- Layer 3: market floors ----

    pub fn check_health(
        &self,
        health: Option<&Observed<HealthSnapshot>>,
        now: DateTime<Utc>,
    ) -> GateResult {
        let Some(obs) = health else {
            return GateResult::resize(
                self.config.stale_size_factor,
                "health metric unavailable".to_string(),
            );
        };
        let Some(ratio) = obs.value.ratio else {
            return GateResult::Pass;
        };

        if ratio < self.config.critical_health_ratio {
            return GateResult::Reject(format!(
                "health ratio {ratio} below critical floor {}",
                self.config.critical_health_ratio
            ));
        }

        let age_secs = obs.age_secs(now);
        if obs.stale && age_secs > self.config.max_health_staleness_secs {
            return GateResult::resize(
                self.config.stale_size_factor,
                format!(
                    "health metric stale for {age_secs}s (bound {}s)",
                    self.config.max_health_staleness_secs
                ),
            );
        }

        let mut notes = Vec::new();
        if ratio < self.config.warning_health_ratio {
            notes.push(format!(
                "health ratio {ratio} in warning band [{}, {})",
                self.config.critical_health_ratio, self.config.warning_health_ratio
            ));
        }
        if obs.stale {
            notes.push(format!("health metric stale for {age_secs}s"));
        }
        if notes.is_empty() {
            GateResult::Pass
        } else {
            GateResult::caution(notes.join("; "))
        }
    }

    pub fn check_market_data(
        &self,
        symbol: &str,
        market: Option<&Observed<MarketSnapshot>>,
        now: DateTime<Utc>,
    ) -> GateResult {
        let Some(obs) = market else {
            return GateResult::Reject(format!("market data unavailable for {symbol}"));
        };
        if !obs.stale {
            return GateResult::Pass;
        }
        let age_secs = obs.age_secs(now);
        if age_secs > self.config.max_market_staleness_secs {
            return GateResult::resize(
                self.config.stale_size_factor,
                format!(
                    "market data for {symbol} stale for {age_secs}s (bound {}s)",
                    self.config.max_market_staleness_secs
                ),
            );
        }
        GateResult::caution(format!("market data for {symbol} stale for {age_secs}s"))
    }

    pub fn check_trade_cap(&self, tracker: &TrackerState) -> GateResult {
        if tracker.daily_trade_count >= self.config.max_daily_trades {
            return GateResult::Reject(format!(
                "daily trade cap reached ({}/{})",
                tracker.daily_trade_count, self.config.max_daily_trades
            ));
        }
        GateResult::Pass
    }

    pub fn check_loss_streak(&self, tracker: &TrackerState) -> GateResult {
        if tracker.consecutive_losses >= self.config.loss_streak_halt {
            return GateResult::Reject(format!(
                "{} consecutive losses >= cool-down threshold {}",
                tracker.consecutive_losses, self.config.loss_streak_halt
            ));
        }
        GateResult::Pass
    }

    pub fn check_warning_state(&self, state: KillSwitchState) -> GateResult {
        if state == KillSwitchState::Warning {
            return GateResult::caution("kill switch in WARNING".to_string());
        }
        GateResult::Pass
    }

    // ---- Layer 4: kill switch ----

    pub fn check_kill_switch(&self, state: KillSwitchState) -> GateResult {
        if state == KillSwitchState::Halted {
            return GateResult::Reject("kill switch HALTED, admissions blocked".to_string());
        }
        GateResult::Pass
    }
}
