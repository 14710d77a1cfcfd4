//! What the server needs from the running loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tgate_core::BoxFuture;
use tgate_position::Position;
use tgate_risk::{KillSwitchStatus, TrackerState};

use crate::error::ControlResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub mode: String,
    pub cycles_run: u64,
    pub tracker: TrackerState,
    pub kill_switch: KillSwitchStatus,
    pub open_positions: usize,
    pub flagged_positions: usize,
    /// Summary of the most recent cycle, as journaled.
    pub last_cycle: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRequest {
    pub operator: String,
}

pub trait ControlHandle: Send + Sync {
    fn status(&self) -> BoxFuture<'_, StatusReport>;

    fn open_positions(&self) -> BoxFuture<'_, Vec<Position>>;

    /// Manual HALTED -> ARMED. [`crate::ControlError::NotHalted`] otherwise.
    fn reset_kill_switch(&self, operator: String) -> BoxFuture<'_, ControlResult<KillSwitchStatus>>;
}

pub type DynControlHandle = Arc<dyn ControlHandle>;
