//! # GOpen Gateway Library
//!
//! A declarative API gateway: each configured endpoint runs an ordered list of backend calls,
//! rewrites request and response data through modifiers as it goes, and can serve or store
//! the final response through a cache.
//!
//! ## Module Layout
//!
//! - [`core`]: errors, configuration, value objects and pipeline state
//! - [`modifier`]: the modification engine (`PARAM`, `HEADER`, `QUERY`, `BODY`, `STATUS_CODE`)
//! - [`pipeline`]: backend and endpoint services
//! - [`caching`]: cache policy, stores and the cache middleware
//! - [`routing`]: method and path matching to endpoints
//! - [`gateway`]: compiled runtime, hot swapping and the axum server
//! - [`observability`]: logging and metrics

/// Error types, configuration, value objects and the request/response snapshots
pub mod core;

/// Request and response modification engine
pub mod modifier;

/// Sequential backend execution for endpoints
pub mod pipeline;

/// Response caching: policy, stores and middleware
pub mod caching;

/// Endpoint routing on a radix tree
pub mod routing;

/// Runtime snapshot and HTTP server
pub mod gateway;

/// Structured logging and metrics
pub mod observability;

pub use crate::core::config::{ConfigManager, GatewayConfig};
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::core::types::{GatewayResponse, Request, Response};
pub use gateway::{GatewayServer, Runtime, RuntimeHandle};
