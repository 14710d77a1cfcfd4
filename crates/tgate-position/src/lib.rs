//! Laddered positions.
//!
//! A position is built from staged entry tranches and unwound through staged
//! exit tranches, with a stop that only ever tightens.
//!
//! # Key Components
//!
//! - [`LadderConfig`]: Entry/exit tier offsets and size fractions
//! - [`Position`]: Tranches, average entry, P&L, stop level and lifecycle status
//! - [`PositionBook`]: Open positions, one lock per position, plus a closed archive

pub mod book;
pub mod error;
pub mod ladder;
pub mod position;

pub use book::{PositionBook, PositionHandle};
pub use error::{PositionError, PositionResult};
pub use ladder::{LadderConfig, TierSpec, MAX_TIERS};
pub use position::{
    CloseReason, Position, PositionStatus, StopLevel, StopStage, Tranche, TrancheKind,
    TrancheStatus, TriggerCondition,
};
