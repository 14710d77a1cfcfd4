//! Prometheus metrics and structured logging.
//!
//! - Structured logging with tracing, JSON in production
//! - Prometheus metrics for cycles, gate outcomes, kill switch and execution

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, TelemetryConfig};
pub use metrics::Metrics;
