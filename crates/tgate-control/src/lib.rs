//! Operator control surface.
//!
//! ```text
//! GET  /api/status            tracker, kill switch, last cycle summary
//! GET  /api/positions         open positions with ladder state
//! POST /api/kill-switch/reset manual HALTED -> ARMED ({"operator": "..."})
//! GET  /metrics               Prometheus text format
//! ```
//!
//! The loop controller implements [`ControlHandle`]; the server only
//! translates HTTP to those calls. Optional basic auth covers every route.

mod auth;
mod config;
mod error;
mod handle;
mod server;

pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use handle::{ControlHandle, DynControlHandle, ResetRequest, StatusReport};
pub use server::{create_router, run_server};
