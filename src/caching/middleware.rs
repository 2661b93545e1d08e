//! # Cache Middleware
//!
//! Wraps the endpoint pipeline with the cache read and write paths. A readable request is
//! looked up by its strategy key and served from the store on a hit; otherwise the pipeline
//! runs and a writable response is stored for the endpoint's duration.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::policy::EndpointCache;
use super::stores::{CacheEntry, CacheStore};
use crate::core::error::GatewayResult;
use crate::core::types::{GatewayResponse, Request, X_GOPEN_CACHE, X_GOPEN_CACHE_TTL};
use crate::observability::metrics;

/// Cache middleware
#[derive(Clone)]
pub struct CacheMiddleware {
    store: Arc<dyn CacheStore>,
}

impl CacheMiddleware {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Serve `request` from the cache or run `next` and cache its response.
    ///
    /// A pipeline error becomes an incomplete error response that is never cached.
    pub async fn handle<F, Fut>(
        &self,
        endpoint: &str,
        cache: Option<&EndpointCache>,
        request: &Request,
        next: F,
    ) -> GatewayResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<GatewayResponse>>,
    {
        let Some(cache) = cache else {
            return next().await.unwrap_or_else(|e| GatewayResponse::incomplete(&e));
        };

        let readable = cache.can_read(request);
        let key = cache.strategy_key(request);

        if readable {
            if let Some(entry) = self.lookup(&key).await {
                metrics::record_cache_hit(endpoint);
                debug!(key = %key, "Cache hit");
                let mut response = entry.to_response();
                response.header = response
                    .header
                    .set(X_GOPEN_CACHE, "HIT")
                    .set(X_GOPEN_CACHE_TTL, format_ttl(entry.remaining_ttl()));
                return response;
            }
            metrics::record_cache_miss(endpoint);
            debug!(key = %key, "Cache miss");
        }

        let mut response = match next().await {
            Ok(response) => response,
            Err(e) => return GatewayResponse::incomplete(&e),
        };

        if cache.can_write(request, &response) {
            if let Some(duration) = cache.duration() {
                let entry = CacheEntry::new(key.as_str(), &response, duration);
                match self.store.set(&key, &entry, duration).await {
                    Ok(()) => debug!(key = %key, ttl = ?duration, "Response cached"),
                    Err(e) => warn!(key = %key, error = %e, "Failed to write cache entry"),
                }
            }
        }

        if readable {
            response.header = response.header.set(X_GOPEN_CACHE, "MISS");
        }
        response
    }

    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Ok(entry) => entry.filter(|entry| !entry.is_expired()),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cache entry, treating as miss");
                None
            }
        }
    }
}

/// Whole seconds in humantime notation, e.g. `1m 30s`
fn format_ttl(remaining: Duration) -> String {
    humantime::format_duration(Duration::from_secs(remaining.as_secs())).to_string()
}
