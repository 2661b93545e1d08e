//! # Metrics Collection
//!
//! Gateway counters and histograms recorded through the `metrics` facade, with an optional
//! Prometheus scrape endpoint. Without an installed recorder every call is a no-op, so the
//! pipeline records unconditionally.
//!
//! ## Metrics
//! - `gateway_requests_total` / `gateway_request_duration_seconds` by method, endpoint, status
//! - `gateway_cache_hits_total` / `gateway_cache_misses_total` by endpoint
//! - `gateway_backend_requests_total` / `gateway_backend_duration_seconds` by backend, status
//! - `gateway_backend_errors_total` by backend and error kind

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use thiserror::Error;
use tracing::info;

use crate::core::config::MetricsConfig;

const LATENCY_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Errors that can occur while setting up metrics export
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to initialize metrics exporter: {0}")]
    InitializationError(String),

    #[error("Invalid metric configuration: {0}")]
    ConfigurationError(String),
}

/// Install the Prometheus recorder and its HTTP listener when metrics are enabled.
///
/// Returns whether an exporter was installed.
pub fn install_prometheus(config: &MetricsConfig) -> Result<bool, MetricsError> {
    if !config.enabled {
        return Ok(false);
    }

    let address: SocketAddr = config.bind_address.parse().map_err(|e| {
        MetricsError::ConfigurationError(format!(
            "invalid metrics bind address '{}': {}",
            config.bind_address, e
        ))
    })?;

    prometheus_builder()?
        .with_http_listener(address)
        .install()
        .map_err(|e| MetricsError::InitializationError(e.to_string()))?;

    info!(address = %address, "Prometheus metrics exporter listening");
    Ok(true)
}

fn prometheus_builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &LATENCY_BUCKETS,
        )
        .map_err(|e| {
            MetricsError::InitializationError(format!("Failed to set histogram buckets: {}", e))
        })
}

/// Record one client request
pub fn record_request(method: &str, endpoint: &str, status: StatusCode, duration: Duration) {
    let status = status.as_u16().to_string();
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status_code" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status_code" => status
    )
    .record(duration.as_secs_f64());
}

pub fn record_cache_hit(endpoint: &str) {
    metrics::counter!("gateway_cache_hits_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_cache_miss(endpoint: &str) {
    metrics::counter!("gateway_cache_misses_total", "endpoint" => endpoint.to_string())
        .increment(1);
}

/// Record one upstream call, including synthetic failures
pub fn record_backend_request(backend: &str, status: StatusCode, duration: Duration) {
    let status = status.as_u16().to_string();
    metrics::counter!(
        "gateway_backend_requests_total",
        "backend" => backend.to_string(),
        "status_code" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_backend_duration_seconds",
        "backend" => backend.to_string(),
        "status_code" => status
    )
    .record(duration.as_secs_f64());
}

/// `kind` is one of `transport`, `timeout` or `deadline`
pub fn record_backend_error(backend: &str, kind: &'static str) {
    metrics::counter!(
        "gateway_backend_errors_total",
        "backend" => backend.to_string(),
        "kind" => kind
    )
    .increment(1);
}
