//! # Caching System Module
//!
//! Response caching for endpoints. The policy side decides, per request, whether a cached
//! response may be served or a fresh one stored; the store side keeps the entries either in
//! process or in Redis.
//!
//! ## Architecture
//! 1. **Policy**: the global [`Cache`] defaults merged into one [`EndpointCache`] per endpoint
//! 2. **Cache Stores**: in-memory and Redis implementations behind [`CacheStore`]
//! 3. **Middleware**: wraps the endpoint pipeline with the read and write paths
//!
//! Cache failures never fail a request: a store error is logged and treated as a miss, or as a
//! skipped write.

pub mod middleware;
pub mod policy;
pub mod stores;

pub use middleware::CacheMiddleware;
pub use policy::{Cache, CacheControl, EndpointCache};
pub use stores::{create_store, CacheEntry, CacheStore, InMemoryCache, RedisCache};

use crate::core::error::GatewayError;

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache not available")]
    Unavailable,
}

impl From<CacheError> for GatewayError {
    fn from(err: CacheError) -> Self {
        GatewayError::internal(format!("Cache error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_converts_to_internal_gateway_error() {
        let error: GatewayError = CacheError::Unavailable.into();
        assert_eq!(error.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(error.to_string().contains("Cache not available"));
    }
}
