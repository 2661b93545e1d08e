//! # Error Handling Module
//!
//! Every failure the gateway can surface is a variant of [`GatewayError`], built with
//! `thiserror`. Each variant maps to an HTTP status code so the axum handler can turn
//! any error into a well-formed JSON response.
//!
//! ## Propagation Rules
//! - Backend transport errors never reach this type: the backend service records them
//!   as a synthetic failed response instead.
//! - Modifier and cache errors are logged and swallowed at the lowest layer.
//! - Configuration errors are fatal at startup and abort a reload.
//! - An expired request deadline surfaces as [`GatewayError::Timeout`].

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration that parsed but cannot be compiled into a runtime
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    /// Configuration file that could not be read or parsed
    #[error("Cannot load configuration ({format}): {message}")]
    ConfigSource { format: &'static str, message: String },

    /// The request deadline passed before the pipeline finished
    #[error("Endpoint deadline of {timeout_ms}ms exceeded")]
    Timeout { timeout_ms: u64 },

    #[error("No endpoint matches {path}")]
    RouteNotFound { path: String },

    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    /// Oversized or unreadable request data
    #[error("Invalid request {field}: {reason}")]
    RequestValidation { field: String, reason: String },

    /// The outbound HTTP client could not be built
    #[error("Upstream client error: {message}")]
    HttpClient { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Deadline error carrying the budget that was exceeded
    pub fn timeout(budget: Duration) -> Self {
        Self::Timeout {
            timeout_ms: budget.as_millis() as u64,
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RequestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. } | Self::ConfigSource { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable identifier written to the `type` field of error bodies
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } | Self::ConfigSource { .. } => "configuration",
            Self::Timeout { .. } => "timeout",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::RequestValidation { .. } => "invalid_request",
            Self::HttpClient { .. } => "upstream_client",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::ConfigSource {
            format: "io",
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigSource {
            format: "json",
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigSource {
            format: "yaml",
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

/// `{"error": {"code", "message", "type"}}` with the mapped status
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });
        (status, Json(body)).into_response()
    }
}
