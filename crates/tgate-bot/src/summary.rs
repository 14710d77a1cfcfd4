//! Per-cycle summary and persisted state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tgate_core::PositionId;
use tgate_executor::PositionEvent;
use tgate_position::Position;
use tgate_risk::{KillSwitchState, KillSwitchStatus, RiskDecision, TrackerState};

use crate::config::OperatingMode;

/// One gate decision as journaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub score: Decimal,
    #[serde(flatten)]
    pub decision: RiskDecision,
    /// Position opened for this decision, if it was deployed.
    #[serde(default)]
    pub position_id: Option<PositionId>,
}

/// Everything one cycle did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub mode: OperatingMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub seen: usize,
    pub scored: usize,
    pub below_threshold: usize,
    pub invalid: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub decisions: Vec<DecisionRecord>,
    pub positions_opened: Vec<PositionId>,
    pub positions_closed: Vec<PositionId>,
    pub flagged_positions: Vec<PositionId>,
    pub execution_failures: Vec<String>,
    /// Feeds that served a last-known value or nothing at all.
    pub stale_sources: Vec<String>,
    pub kill_switch_transitions: Vec<KillSwitchState>,
    pub events: Vec<PositionEvent>,
    pub tracker: TrackerState,
    pub kill_switch: KillSwitchStatus,
}

impl CycleSummary {
    pub(crate) fn begin(
        cycle: u64,
        mode: OperatingMode,
        now: DateTime<Utc>,
        tracker: TrackerState,
        kill_switch: KillSwitchStatus,
    ) -> Self {
        Self {
            cycle,
            mode,
            started_at: now,
            finished_at: now,
            seen: 0,
            scored: 0,
            below_threshold: 0,
            invalid: 0,
            admitted: 0,
            rejected: 0,
            decisions: Vec::new(),
            positions_opened: Vec::new(),
            positions_closed: Vec::new(),
            flagged_positions: Vec::new(),
            execution_failures: Vec::new(),
            stale_sources: Vec::new(),
            kill_switch_transitions: Vec::new(),
            events: Vec::new(),
            tracker,
            kill_switch,
        }
    }

    pub(crate) fn mark_stale(&mut self, source: &str) {
        if !self.stale_sources.iter().any(|s| s == source) {
            self.stale_sources.push(source.to_string());
        }
    }

    pub fn decision(&self, candidate_id: &str) -> Option<&DecisionRecord> {
        self.decisions
            .iter()
            .find(|d| d.decision.candidate_id == candidate_id)
    }

    pub fn tripped(&self) -> bool {
        self.kill_switch_transitions
            .contains(&KillSwitchState::Halted)
    }
}

/// Everything needed to resume after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub tracker: TrackerState,
    pub kill_switch: KillSwitchStatus,
    /// Open positions with their full tranche history.
    pub positions: Vec<Position>,
    #[serde(default)]
    pub cycles_run: u64,
    pub saved_at: DateTime<Utc>,
}
