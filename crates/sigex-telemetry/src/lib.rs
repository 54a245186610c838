//! Prometheus metrics and structured logging for sigex.
//!
//! Provides:
//! - Prometheus metrics for admission, order placement, brackets and queues
//! - Structured logging with tracing (JSON in production)
//! - Session summary output built from the metric registry

pub mod error;
pub mod logging;
pub mod metrics;
pub mod summary;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use summary::{SessionSummary, SessionSummaryReporter};
