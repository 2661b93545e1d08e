//! # Structured Logging
//!
//! Subscriber setup from the logging configuration and the request logging middleware.
//!
//! ## Key Features
//! - JSON or plain text output through `tracing-subscriber`
//! - `RUST_LOG` takes precedence over the configured level
//! - One "request started" and one "request finished" event per request, carrying the trace
//!   id and the forwarding chain

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::LoggingConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{X_FORWARDED_FOR, X_TRACE_ID};

/// Output format of log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn parse(format: &str) -> GatewayResult<Self> {
        match format.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(GatewayError::config(format!("unknown log format '{}'", other))),
        }
    }
}

pub fn parse_level(level: &str) -> GatewayResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(GatewayError::config(format!("unknown log level '{}'", other))),
    }
}

/// Install the global subscriber.
///
/// A subscriber that is already installed is kept, which lets tests call this repeatedly.
pub fn init_logging(config: &LoggingConfig) -> GatewayResult<()> {
    let level = parse_level(&config.level)?;
    let format = LogFormat::parse(&config.format)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let initialized = match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    if initialized.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(level = %level, format = ?format, "Structured logging initialized");
    Ok(())
}

/// Request logging middleware, meant for `axum::middleware::from_fn`.
///
/// Runs after the trace id and forwarding headers have been settled.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let trace_id = header_value(&request, X_TRACE_ID);
    let forwarded_for = header_value(&request, X_FORWARDED_FOR);

    info!(
        trace_id = %trace_id,
        forwarded_for = %forwarded_for,
        method = %method,
        path = %path,
        "Request started"
    );

    let response = next.run(request).await;

    info!(
        trace_id = %trace_id,
        forwarded_for = %forwarded_for,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "Request finished"
    );

    response
}

fn header_value(request: &Request, name: &str) -> String {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("warn").unwrap(), Level::WARN);
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(LogFormat::parse("json").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::parse("Text").unwrap(), LogFormat::Text);
        assert!(LogFormat::parse("xml").is_err());
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_init_logging_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            format: "json".to_string(),
        };
        assert!(init_logging(&config).is_err());
    }
}
