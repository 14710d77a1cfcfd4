//! Risk bookkeeping and admission control.
//!
//! - `TrackerState`: rolling daily/weekly loss, loss streak, session drawdown,
//!   open-position count and aggregate exposure
//! - `KillSwitch`: ARMED / WARNING / HALTED latch driven by tracker and health
//! - `RiskGate`: four ordered policy layers that admit, resize or reject a
//!   scored candidate
//!
//! Gate evaluation is pure. It reads only the snapshots handed to it in a
//! `GateContext`, so the same inputs always produce the same `RiskDecision`.

pub mod error;
pub mod gates;
pub mod kill_switch;
pub mod tracker;

pub use error::{RiskError, RiskResult};
pub use gates::{
    GateContext, GateLayer, GateResult, HealthLevel, RiskDecision, RiskGate, RiskGateConfig,
};
pub use kill_switch::{
    KillSwitch, KillSwitchConfig, KillSwitchInputs, KillSwitchState, KillSwitchStatus, TripReason,
};
pub use tracker::{Rollover, TrackerConfig, TrackerState};
