//! Prometheus metrics and structured logging.
//!
//! - Structured logging with tracing (JSON in production)
//! - Process-wide Prometheus metrics for ticks, order transitions, gates,
//!   sizing, trailing stops and gateway latency

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, DEFAULT_FILTER};
pub use metrics::Metrics;
