//! Observability.
//!
//! Structured logging via `tracing` and Prometheus-compatible metrics for
//! the reconciler, share offers, and stage progress.

pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
