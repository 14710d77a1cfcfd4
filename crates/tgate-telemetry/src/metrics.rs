//! Prometheus metrics for the tactical risk gate.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a startup bug that should crash immediately.
//! These panics can only happen during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_int_gauge, CounterVec,
    Encoder, Gauge, Histogram, IntGauge, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{TelemetryError, TelemetryResult};

/// Completed cycles by outcome.
pub static CYCLES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("tgate_cycles_total", "Cycles run", &["outcome"]).unwrap()
});

pub static CYCLE_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "tgate_cycle_duration_ms",
        "Wall time of one cycle in milliseconds",
        vec![5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0, 120000.0]
    )
    .unwrap()
});

/// Candidates per pipeline stage.
/// Labels: stage (seen/scored/below_threshold/invalid/admitted/rejected)
pub static CANDIDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tgate_candidates_total",
        "Candidates per pipeline stage",
        &["stage"]
    )
    .unwrap()
});

pub static GATE_REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tgate_gate_rejections_total",
        "Risk gate rejections by layer",
        &["layer"]
    )
    .unwrap()
});

pub static GATE_ADJUSTMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tgate_gate_adjustments_total",
        "Risk gate adjustments by layer",
        &["layer"]
    )
    .unwrap()
});

/// 0 = armed, 1 = warning, 2 = halted.
pub static KILL_SWITCH_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tgate_kill_switch_state",
        "Kill switch state (0=armed, 1=warning, 2=halted)"
    )
    .unwrap()
});

pub static KILL_SWITCH_TRIPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tgate_kill_switch_trips_total",
        "Kill switch trips by reason",
        &["reason"]
    )
    .unwrap()
});

pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tgate_open_positions", "Positions not yet closed").unwrap()
});

pub static FLAGGED_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tgate_flagged_positions",
        "Positions flagged for manual attention"
    )
    .unwrap()
});

pub static AGGREGATE_EXPOSURE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tgate_aggregate_exposure",
        "Resting plus held notional across positions"
    )
    .unwrap()
});

pub static DAILY_LOSS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("tgate_daily_loss", "Net realized loss in the current day").unwrap()
});

pub static WEEKLY_LOSS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("tgate_weekly_loss", "Net realized loss in the current week").unwrap()
});

pub static SESSION_DRAWDOWN_PCT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tgate_session_drawdown_pct",
        "Maximum session drawdown in percent"
    )
    .unwrap()
});

pub static CONSECUTIVE_LOSSES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tgate_consecutive_losses", "Current losing-close streak").unwrap()
});

/// Labels: purpose (entry/exit/stop)
pub static EXECUTION_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tgate_execution_failures_total",
        "Placements that failed after all retries",
        &["purpose"]
    )
    .unwrap()
});

pub static STALE_FALLBACKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tgate_stale_fallbacks_total",
        "Fetches served from a stale cached value",
        &["feed"]
    )
    .unwrap()
});

fn as_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn cycle_completed(duration_ms: f64) {
        CYCLES_TOTAL.with_label_values(&["completed"]).inc();
        CYCLE_DURATION_MS.observe(duration_ms);
    }

    pub fn cycle_failed() {
        CYCLES_TOTAL.with_label_values(&["failed"]).inc();
    }

    pub fn candidates(stage: &str, count: usize) {
        if count > 0 {
            CANDIDATES_TOTAL
                .with_label_values(&[stage])
                .inc_by(count as f64);
        }
    }

    pub fn gate_rejected(layer: &str) {
        GATE_REJECTIONS_TOTAL.with_label_values(&[layer]).inc();
    }

    pub fn gate_adjusted(layer: &str) {
        GATE_ADJUSTMENTS_TOTAL.with_label_values(&[layer]).inc();
    }

    pub fn kill_switch_state(level: i64) {
        KILL_SWITCH_STATE.set(level);
    }

    pub fn kill_switch_tripped(reason: &str) {
        KILL_SWITCH_TRIPS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn positions(open: usize, flagged: usize, exposure: Decimal) {
        OPEN_POSITIONS.set(open as i64);
        FLAGGED_POSITIONS.set(flagged as i64);
        AGGREGATE_EXPOSURE.set(as_f64(exposure));
    }

    pub fn tracker(
        daily_loss: Decimal,
        weekly_loss: Decimal,
        session_drawdown_pct: Decimal,
        consecutive_losses: u32,
    ) {
        DAILY_LOSS.set(as_f64(daily_loss));
        WEEKLY_LOSS.set(as_f64(weekly_loss));
        SESSION_DRAWDOWN_PCT.set(as_f64(session_drawdown_pct));
        CONSECUTIVE_LOSSES.set(i64::from(consecutive_losses));
    }

    pub fn execution_failure(purpose: &str) {
        EXECUTION_FAILURES_TOTAL.with_label_values(&[purpose]).inc();
    }

    pub fn stale_fallback(feed: &str) {
        STALE_FALLBACKS_TOTAL.with_label_values(&[feed]).inc();
    }

    /// All registered metrics in Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_gather_includes_recorded_metrics() {
        Metrics::kill_switch_state(2);
        Metrics::gate_rejected("kill_switch");
        Metrics::positions(1, 0, dec!(250.5));

        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("tgate_kill_switch_state 2"));
        assert!(text.contains("tgate_gate_rejections_total{layer=\"kill_switch\"}"));
        assert!(text.contains("tgate_aggregate_exposure 250.5"));
    }
}
