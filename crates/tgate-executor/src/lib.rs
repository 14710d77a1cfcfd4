//! Ladder execution.
//!
//! Turns an admitted candidate into a laddered [`Position`] and drives it
//! through fills, partial exits and stop adjustments against an
//! [`ExecutionAdapter`].
//!
//! Resting tranches are held by the engine as price triggers. When the market
//! reaches a tranche, the engine submits it to the adapter, retries per
//! [`ExecutionConfig`], and records the result on the position.
//!
//! [`Position`]: tgate_position::Position

pub mod adapter;
pub mod engine;
pub mod error;

pub use adapter::{
    BoxFuture, DynExecutionAdapter, ExecutionAdapter, FillReport, MockExecutionAdapter,
    MockOutcome, OrderPurpose, PaperExecutionAdapter, TrancheOrder,
};
pub use engine::{ExecutionConfig, LadderEngine, PositionEvent};
pub use error::{ExecutorError, ExecutorResult};
