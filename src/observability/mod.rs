// Structured logging and request logging middleware
pub mod logging;

// Metrics collection and Prometheus export
pub mod metrics;

pub use logging::{init_logging, log_requests};
pub use metrics::{install_prometheus, MetricsError};
