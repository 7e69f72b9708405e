//! # Telemetrist - Logging, Tracing and Metrics
//!
//! Observability collaborators used by the request orchestrator:
//! structured logging setup, B3-propagated request spans and Prometheus timing metrics.

pub mod logging;
pub mod metrics;
pub mod span;

pub use logging::init_logging;
pub use self::metrics::init_metrics;
pub use span::{Logger, SpanContext, SpanHandle};

#[derive(Debug, thiserror::Error)]
pub enum TelemetristError {
    #[error("Initialization error: {0}")]
    Init(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
