//! State snapshots and JSON Lines journals.
//!
//! - [`StateStore`]: whole-state JSON snapshot, replaced atomically on save
//! - [`JsonLinesWriter`]: append-only daily journal of cycle summaries and
//!   closed positions

pub mod config;
pub mod error;
pub mod store;
pub mod writer;

pub use config::PersistenceConfig;
pub use error::{PersistenceError, PersistenceResult};
pub use store::StateStore;
pub use writer::JsonLinesWriter;
