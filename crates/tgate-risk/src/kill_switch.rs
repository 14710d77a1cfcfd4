//! Kill switch: ARMED / WARNING / HALTED latch.
//!
//! Soft breaches move ARMED to WARNING, and WARNING only falls back to ARMED
//! after the breaches have stayed clear for `warning_clear_secs`. Any single
//! hard breach latches HALTED. HALTED is left only through [`KillSwitch::reset`],
//! which nothing inside the cycle calls.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{RiskError, RiskResult};
use crate::gates::HealthLevel;
use crate::tracker::TrackerState;

/// Operating level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KillSwitchState {
    #[default]
    Armed,
    Warning,
    Halted,
}

impl KillSwitchState {
    /// Metrics encoding: 0 armed, 1 warning, 2 halted.
    pub fn as_level(&self) -> i64 {
        match self {
            Self::Armed => 0,
            Self::Warning => 1,
            Self::Halted => 2,
        }
    }
}

impl std::fmt::Display for KillSwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Armed => write!(f, "ARMED"),
            Self::Warning => write!(f, "WARNING"),
            Self::Halted => write!(f, "HALTED"),
        }
    }
}

/// Hard breach that latched HALTED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TripReason {
    SessionDrawdown {
        drawdown_pct: Decimal,
        threshold_pct: Decimal,
    },
    LossStreak {
        count: u32,
        cap: u32,
    },
    CriticalHealth {
        ratio: Decimal,
    },
    DailyLoss {
        loss: Decimal,
        limit: Decimal,
    },
}

impl TripReason {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionDrawdown { .. } => "session_drawdown",
            Self::LossStreak { .. } => "loss_streak",
            Self::CriticalHealth { .. } => "critical_health",
            Self::DailyLoss { .. } => "daily_loss",
        }
    }
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionDrawdown {
                drawdown_pct,
                threshold_pct,
            } => write!(
                f,
                "session drawdown {drawdown_pct}% >= kill threshold {threshold_pct}%"
            ),
            Self::LossStreak { count, cap } => {
                write!(f, "{count} consecutive losses >= hard cap {cap}")
            }
            Self::CriticalHealth { ratio } => {
                write!(f, "health ratio {ratio} below critical floor")
            }
            Self::DailyLoss { loss, limit } => {
                write!(f, "daily loss {loss} >= hard limit {limit}")
            }
        }
    }
}

/// Kill switch thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    /// Session drawdown (percent) that latches HALTED.
    #[serde(default = "default_kill_drawdown_pct")]
    pub kill_drawdown_pct: Decimal,
    /// Fraction of a hard threshold that counts as a soft breach.
    #[serde(default = "default_warning_fraction")]
    pub warning_fraction: Decimal,
    /// Consecutive losses that latch HALTED.
    #[serde(default = "default_hard_loss_streak")]
    pub hard_loss_streak: u32,
    /// Consecutive losses that raise WARNING.
    #[serde(default = "default_soft_loss_streak")]
    pub soft_loss_streak: u32,
    /// Daily loss that latches HALTED. 0 disables.
    #[serde(default)]
    pub hard_daily_loss: Decimal,
    /// Seconds without a soft breach before WARNING clears.
    #[serde(default = "default_warning_clear_secs")]
    pub warning_clear_secs: i64,
}

fn default_kill_drawdown_pct() -> Decimal {
    Decimal::from(10)
}

fn default_warning_fraction() -> Decimal {
    Decimal::new(5, 1)
}

fn default_hard_loss_streak() -> u32 {
    5
}

fn default_soft_loss_streak() -> u32 {
    3
}

fn default_warning_clear_secs() -> i64 {
    1800
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            kill_drawdown_pct: default_kill_drawdown_pct(),
            warning_fraction: default_warning_fraction(),
            hard_loss_streak: default_hard_loss_streak(),
            soft_loss_streak: default_soft_loss_streak(),
            hard_daily_loss: Decimal::ZERO,
            warning_clear_secs: default_warning_clear_secs(),
        }
    }
}

impl KillSwitchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.kill_drawdown_pct <= Decimal::ZERO {
            return Err(format!(
                "kill_drawdown_pct ({}) must be positive",
                self.kill_drawdown_pct
            ));
        }
        if self.warning_fraction <= Decimal::ZERO || self.warning_fraction >= Decimal::ONE {
            return Err(format!(
                "warning_fraction ({}) must be within (0, 1)",
                self.warning_fraction
            ));
        }
        if self.hard_loss_streak == 0 {
            return Err("hard_loss_streak must be at least 1".to_string());
        }
        if self.soft_loss_streak == 0 || self.soft_loss_streak > self.hard_loss_streak {
            return Err(format!(
                "soft_loss_streak ({}) must be within 1..={}",
                self.soft_loss_streak, self.hard_loss_streak
            ));
        }
        if self.hard_daily_loss < Decimal::ZERO {
            return Err("hard_daily_loss must be non-negative".to_string());
        }
        if self.warning_clear_secs < 0 {
            return Err("warning_clear_secs must be non-negative".to_string());
        }
        Ok(())
    }
}

/// Everything the kill switch looks at in one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct KillSwitchInputs<'a> {
    pub tracker: &'a TrackerState,
    pub health: HealthLevel,
    /// The gate's daily loss limit, used for the soft daily-loss breach.
    pub daily_loss_limit: Decimal,
    pub now: DateTime<Utc>,
}

/// Persisted part of the kill switch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchStatus {
    pub state: KillSwitchState,
    pub trip_reason: Option<TripReason>,
    pub tripped_at: Option<DateTime<Utc>>,
    /// Soft breaches seen at the last evaluation.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// First evaluation in WARNING with no soft breach; drives hysteresis.
    #[serde(default)]
    pub clear_since: Option<DateTime<Utc>>,
}

/// Kill switch state machine.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    config: KillSwitchConfig,
    status: KillSwitchStatus,
}

impl KillSwitch {
    pub fn new(config: KillSwitchConfig) -> Self {
        Self::from_status(config, KillSwitchStatus::default())
    }

    /// Rebuild from persisted status.
    pub fn from_status(config: KillSwitchConfig, status: KillSwitchStatus) -> Self {
        Self { config, status }
    }

    pub fn state(&self) -> KillSwitchState {
        self.status.state
    }

    pub fn status(&self) -> &KillSwitchStatus {
        &self.status
    }

    /// Whether new admissions are allowed at all.
    pub fn admits(&self) -> bool {
        self.status.state != KillSwitchState::Halted
    }

    fn hard_breaches(&self, inputs: &KillSwitchInputs<'_>) -> Vec<TripReason> {
        let t = inputs.tracker;
        let mut breaches = Vec::new();

        if t.session_drawdown_pct >= self.config.kill_drawdown_pct {
            breaches.push(TripReason::SessionDrawdown {
                drawdown_pct: t.session_drawdown_pct,
                threshold_pct: self.config.kill_drawdown_pct,
            });
        }
        if t.consecutive_losses >= self.config.hard_loss_streak {
            breaches.push(TripReason::LossStreak {
                count: t.consecutive_losses,
                cap: self.config.hard_loss_streak,
            });
        }
        if let HealthLevel::Critical(ratio) = inputs.health {
            breaches.push(TripReason::CriticalHealth { ratio });
        }
        if self.config.hard_daily_loss > Decimal::ZERO
            && t.daily_loss >= self.config.hard_daily_loss
        {
            breaches.push(TripReason::DailyLoss {
                loss: t.daily_loss,
                limit: self.config.hard_daily_loss,
            });
        }

        breaches
    }

    fn soft_breaches(&self, inputs: &KillSwitchInputs<'_>) -> Vec<String> {
        let t = inputs.tracker;
        let fraction = self.config.warning_fraction;
        let mut breaches = Vec::new();

        let soft_drawdown = self.config.kill_drawdown_pct * fraction;
        if t.session_drawdown_pct > soft_drawdown {
            breaches.push(format!(
                "session drawdown {}% > {}%",
                t.session_drawdown_pct, soft_drawdown
            ));
        }
        if t.consecutive_losses >= self.config.soft_loss_streak {
            breaches.push(format!("{} consecutive losses", t.consecutive_losses));
        }
        let soft_daily = inputs.daily_loss_limit * fraction;
        if inputs.daily_loss_limit > Decimal::ZERO && t.daily_loss >= soft_daily {
            breaches.push(format!("daily loss {} >= {}", t.daily_loss, soft_daily));
        }
        match inputs.health {
            HealthLevel::Warning(ratio) => {
                breaches.push(format!("health ratio {ratio} in warning band"));
            }
            HealthLevel::Stale { age_secs } => {
                breaches.push(format!("health data stale for {age_secs}s"));
            }
            HealthLevel::Unavailable => breaches.push("health data unavailable".to_string()),
            _ => {}
        }

        breaches
    }

    /// Re-evaluate thresholds. Returns the new state if it changed.
    pub fn evaluate(&mut self, inputs: KillSwitchInputs<'_>) -> Option<KillSwitchState> {
        let hard = self.hard_breaches(&inputs);

        if self.status.state == KillSwitchState::Halted {
            if !hard.is_empty() {
                debug!(breaches = hard.len(), "Kill switch already halted");
            }
            return None;
        }

        if let Some(reason) = hard.into_iter().next() {
            self.trip(reason, inputs.now);
            return Some(KillSwitchState::Halted);
        }

        let soft = self.soft_breaches(&inputs);
        match self.status.state {
            KillSwitchState::Armed if !soft.is_empty() => {
                warn!(breaches = ?soft, "Kill switch WARNING");
                self.status.state = KillSwitchState::Warning;
                self.status.warnings = soft;
                self.status.clear_since = None;
                Some(KillSwitchState::Warning)
            }
            KillSwitchState::Warning if !soft.is_empty() => {
                self.status.warnings = soft;
                self.status.clear_since = None;
                None
            }
            KillSwitchState::Warning => {
                let since = *self.status.clear_since.get_or_insert(inputs.now);
                let clear_for = (inputs.now - since).num_seconds();
                if clear_for >= self.config.warning_clear_secs {
                    info!(clear_for_secs = clear_for, "Kill switch back to ARMED");
                    self.status.state = KillSwitchState::Armed;
                    self.status.warnings.clear();
                    self.status.clear_since = None;
                    Some(KillSwitchState::Armed)
                } else {
                    debug!(
                        clear_for_secs = clear_for,
                        required_secs = self.config.warning_clear_secs,
                        "Warning conditions clear, holding WARNING"
                    );
                    None
                }
            }
            _ => None,
        }
    }

    /// Latch HALTED. Keeps the first reason if already halted.
    pub fn trip(&mut self, reason: TripReason, now: DateTime<Utc>) {
        if self.status.state == KillSwitchState::Halted {
            warn!(new_reason = %reason, "Kill switch already halted, ignoring new trip");
            return;
        }
        error!(reason = %reason, "KILL SWITCH TRIPPED");
        self.status.state = KillSwitchState::Halted;
        self.status.trip_reason = Some(reason);
        self.status.tripped_at = Some(now);
        self.status.clear_since = None;
    }

    /// Manual HALTED -> ARMED transition.
    pub fn reset(&mut self, operator: &str, now: DateTime<Utc>) -> RiskResult<()> {
        if self.status.state != KillSwitchState::Halted {
            return Err(RiskError::InvalidTransition(format!(
                "reset requires HALTED, current state is {}",
                self.status.state
            )));
        }

        warn!(
            operator,
            reason = ?self.status.trip_reason.as_ref().map(ToString::to_string),
            tripped_at = ?self.status.tripped_at,
            reset_at = %now,
            "Kill switch manually reset to ARMED"
        );
        self.status = KillSwitchStatus::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerConfig;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn tracker() -> TrackerState {
        TrackerState::new(&TrackerConfig::default(), Utc::now())
    }

    fn inputs(t: &TrackerState, health: HealthLevel, now: DateTime<Utc>) -> KillSwitchInputs<'_> {
        KillSwitchInputs {
            tracker: t,
            health,
            daily_loss_limit: dec!(300),
            now,
        }
    }

    #[test]
    fn test_stays_armed_when_quiet() {
        let mut ks = KillSwitch::new(KillSwitchConfig::default());
        let t = tracker();
        assert_eq!(ks.evaluate(inputs(&t, HealthLevel::Healthy, Utc::now())), None);
        assert_eq!(ks.state(), KillSwitchState::Armed);
        assert!(ks.admits());
    }

    #[test]
    fn test_soft_drawdown_raises_warning() {
        let mut ks = KillSwitch::new(KillSwitchConfig::default());
        let mut t = tracker();
        t.session_drawdown_pct = dec!(5.5); // > 50% of 10

        let changed = ks.evaluate(inputs(&t, HealthLevel::Healthy, Utc::now()));
        assert_eq!(changed, Some(KillSwitchState::Warning));
        assert!(ks.admits());
        assert_eq!(ks.status().warnings.len(), 1);
    }

    #[test]
    fn test_warning_clears_only_after_hysteresis() {
        let mut ks = KillSwitch::new(KillSwitchConfig::default());
        let mut t = tracker();
        let t0 = Utc::now();
        t.consecutive_losses = 3;
        ks.evaluate(inputs(&t, HealthLevel::Healthy, t0));
        assert_eq!(ks.state(), KillSwitchState::Warning);

        t.consecutive_losses = 0;
        assert_eq!(ks.evaluate(inputs(&t, HealthLevel::Healthy, t0)), None);
        let t1 = t0 + Duration::seconds(1799);
        assert_eq!(ks.evaluate(inputs(&t, HealthLevel::Healthy, t1)), None);
        assert_eq!(ks.state(), KillSwitchState::Warning);

        let t2 = t0 + Duration::seconds(1800);
        assert_eq!(
            ks.evaluate(inputs(&t, HealthLevel::Healthy, t2)),
            Some(KillSwitchState::Armed)
        );
    }

    #[test]
    fn test_new_soft_breach_restarts_hysteresis() {
        let mut ks = KillSwitch::new(KillSwitchConfig::default());
        let mut t = tracker();
        let t0 = Utc::now();
        t.consecutive_losses = 3;
        ks.evaluate(inputs(&t, HealthLevel::Healthy, t0));

        t.consecutive_losses = 0;
        ks.evaluate(inputs(&t, HealthLevel::Healthy, t0));
        // Breach reappears mid-window.
        ks.evaluate(inputs(
            &t,
            HealthLevel::Warning(dec!(2.1)),
            t0 + Duration::seconds(900),
        ));
        ks.evaluate(inputs(&t, HealthLevel::Healthy, t0 + Duration::seconds(1000)));
        assert_eq!(
            ks.evaluate(inputs(&t, HealthLevel::Healthy, t0 + Duration::seconds(1900))),
            None
        );
        assert_eq!(
            ks.evaluate(inputs(&t, HealthLevel::Healthy, t0 + Duration::seconds(2800))),
            Some(KillSwitchState::Armed)
        );
    }

    #[test]
    fn test_any_hard_breach_halts_and_keeps_first_reason() {
        let mut ks = KillSwitch::new(KillSwitchConfig::default());
        let mut t = tracker();
        t.session_drawdown_pct = dec!(12);
        t.consecutive_losses = 7;

        let now = Utc::now();
        assert_eq!(
            ks.evaluate(inputs(&t, HealthLevel::Healthy, now)),
            Some(KillSwitchState::Halted)
        );
        assert!(!ks.admits());
        assert!(matches!(
            ks.status().trip_reason,
            Some(TripReason::SessionDrawdown { .. })
        ));

        ks.trip(TripReason::CriticalHealth { ratio: dec!(1.5) }, now);
        assert!(matches!(
            ks.status().trip_reason,
            Some(TripReason::SessionDrawdown { .. })
        ));
        assert_eq!(ks.status().tripped_at, Some(now));
    }

    #[test]
    fn test_critical_health_halts_from_warning() {
        let mut ks = KillSwitch::new(KillSwitchConfig::default());
        let t = tracker();
        ks.evaluate(inputs(&t, HealthLevel::Warning(dec!(2.1)), Utc::now()));
        assert_eq!(ks.state(), KillSwitchState::Warning);

        let changed = ks.evaluate(inputs(&t, HealthLevel::Critical(dec!(1.9)), Utc::now()));
        assert_eq!(changed, Some(KillSwitchState::Halted));
    }

    #[test]
    fn test_halted_never_self_clears() {
        let mut ks = KillSwitch::new(KillSwitchConfig::default());
        let mut t = tracker();
        t.consecutive_losses = 5;
        let t0 = Utc::now();
        ks.evaluate(inputs(&t, HealthLevel::Healthy, t0));

        t.consecutive_losses = 0;
        let later = t0 + Duration::days(3);
        assert_eq!(ks.evaluate(inputs(&t, HealthLevel::Healthy, later)), None);
        assert_eq!(ks.state(), KillSwitchState::Halted);
    }

    #[test]
    fn test_reset_only_from_halted() {
        let mut ks = KillSwitch::new(KillSwitchConfig::default());
        assert!(matches!(
            ks.reset("ops", Utc::now()),
            Err(RiskError::InvalidTransition(_))
        ));

        ks.trip(TripReason::LossStreak { count: 5, cap: 5 }, Utc::now());
        ks.reset("ops", Utc::now()).unwrap();
        assert_eq!(ks.state(), KillSwitchState::Armed);
        assert!(ks.status().trip_reason.is_none());
        assert!(ks.status().tripped_at.is_none());
    }

    #[test]
    fn test_hard_daily_loss_is_optional() {
        let mut t = tracker();
        t.daily_loss = dec!(1000);

        let mut disabled = KillSwitch::new(KillSwitchConfig::default());
        disabled.evaluate(inputs(&t, HealthLevel::Healthy, Utc::now()));
        assert_eq!(disabled.state(), KillSwitchState::Warning);

        let mut enabled = KillSwitch::new(KillSwitchConfig {
            hard_daily_loss: dec!(500),
            ..Default::default()
        });
        enabled.evaluate(inputs(&t, HealthLevel::Healthy, Utc::now()));
        assert_eq!(enabled.state(), KillSwitchState::Halted);
    }

    #[test]
    fn test_status_survives_serde() {
        let mut ks = KillSwitch::new(KillSwitchConfig::default());
        ks.trip(TripReason::CriticalHealth { ratio: dec!(1.95) }, Utc::now());

        let json = serde_json::to_string(ks.status()).unwrap();
        let status: KillSwitchStatus = serde_json::from_str(&json).unwrap();
        let restored = KillSwitch::from_status(KillSwitchConfig::default(), status);
        assert_eq!(restored.state(), KillSwitchState::Halted);
        assert!(!restored.admits());
    }
}
