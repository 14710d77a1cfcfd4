//! Autonomous execution loop.
//!
//! Each cycle pulls trade candidates, scores them, gates them against the
//! live risk state and, in paper mode, works admitted candidates as entry and
//! exit ladders. State is saved after every cycle so a restart resumes with
//! the same counters, kill switch and open positions.

pub mod app;
pub mod config;
pub mod controller;
pub mod error;
pub mod summary;

pub use app::Application;
pub use config::{AppConfig, CycleConfig, OperatingMode};
pub use controller::{CycleController, Feeds};
pub use error::{AppError, AppResult};
pub use summary::{CycleSummary, DecisionRecord, PersistedState};
