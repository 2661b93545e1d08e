//! # Gateway Runtime
//!
//! Immutable snapshot compiled from a [`GatewayConfig`]: endpoints with their parsed modifiers
//! and merged caches, the route table, and the cache store. Requests load the current snapshot
//! once and keep it until they finish; a reload compiles a new snapshot and swaps it in.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{error, info, warn};

use crate::caching::{create_store, CacheMiddleware, CacheStore};
use crate::core::config::{GatewayConfig, ServerConfig};
use crate::core::error::GatewayResult;
use crate::pipeline::{BackendService, Endpoint, EndpointService};
use crate::routing::EndpointRouter;

/// Compiled configuration serving requests
pub struct Runtime {
    server: ServerConfig,
    endpoints: Vec<Endpoint>,
    router: EndpointRouter,
    cache: CacheMiddleware,
    endpoint_service: EndpointService,
}

impl Runtime {
    /// Compile `config` and open the configured cache store
    pub async fn build(config: &GatewayConfig) -> GatewayResult<Self> {
        let store = create_store(&config.store).await?;
        Self::with_store(config, store)
    }

    /// Compile `config` around an existing store
    pub fn with_store(config: &GatewayConfig, store: Arc<dyn CacheStore>) -> GatewayResult<Self> {
        let mut endpoints = Vec::with_capacity(config.endpoints.len());
        let mut router = EndpointRouter::new();

        for (index, endpoint_config) in config.endpoints.iter().enumerate() {
            let endpoint = Endpoint::from_config(
                endpoint_config,
                config.cache.as_ref(),
                config.server.default_timeout,
            )?;
            router.insert(endpoint.method().clone(), endpoint.path(), index)?;
            endpoints.push(endpoint);
        }

        Ok(Self {
            server: config.server.clone(),
            endpoints,
            router,
            cache: CacheMiddleware::new(store),
            endpoint_service: EndpointService::new(BackendService::new()?),
        })
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    pub fn router(&self) -> &EndpointRouter {
        &self.router
    }

    pub fn cache(&self) -> &CacheMiddleware {
        &self.cache
    }

    pub fn endpoint_service(&self) -> &EndpointService {
        &self.endpoint_service
    }

    /// Close the cache store of this snapshot
    pub async fn close(&self) {
        if let Err(e) = self.cache.store().close().await {
            warn!(error = %e, "Failed to close cache store");
        }
    }
}

/// Shared handle to the current runtime
#[derive(Clone)]
pub struct RuntimeHandle {
    current: Arc<ArcSwap<Runtime>>,
}

impl RuntimeHandle {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(runtime)),
        }
    }

    /// Snapshot for one request
    pub fn load(&self) -> Arc<Runtime> {
        self.current.load_full()
    }

    /// Compile `config` and swap it in.
    ///
    /// On error the current runtime keeps serving. The previous store is closed once the
    /// previous runtime's grace period has passed.
    pub async fn reload(&self, config: &GatewayConfig) -> GatewayResult<()> {
        let runtime = match Runtime::build(config).await {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Failed to build runtime, keeping the current one");
                return Err(e);
            }
        };

        let endpoints = runtime.endpoints().len();
        let previous = self.current.swap(Arc::new(runtime));
        info!(endpoints, "Runtime reloaded");

        let grace = previous.server().shutdown_grace_period;
        tokio::spawn(retire(previous, grace));
        Ok(())
    }

    /// Close the store of the current runtime
    pub async fn close(&self) {
        self.load().close().await;
    }
}

async fn retire(runtime: Arc<Runtime>, grace: Duration) {
    tokio::time::sleep(grace).await;
    runtime.close().await;
    info!("Previous runtime retired");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::InMemoryCache;
    use crate::core::config::{MemoryStoreConfig, RedisStoreConfig, StoreConfig};
    use axum::http::Method;

    const CONFIG: &str = r#"
server:
  shutdown_grace_period: 10ms
cache:
  duration: 30s
endpoints:
  - path: /users/:id
    method: GET
    cache:
      enabled: true
    backends:
      - name: users
        hosts: ["http://localhost:8081"]
        path: /v1/users/:id
  - path: /users/:id
    method: DELETE
    backends:
      - name: users
        hosts: ["http://localhost:8081"]
        path: /v1/users/:id
"#;

    fn memory_store() -> Arc<dyn CacheStore> {
        Arc::new(InMemoryCache::new(MemoryStoreConfig::default()))
    }

    #[tokio::test]
    async fn test_runtime_compiles_endpoints_and_routes() {
        let config = GatewayConfig::from_yaml_str(CONFIG).unwrap();
        let runtime = Runtime::with_store(&config, memory_store()).unwrap();

        assert_eq!(runtime.endpoints().len(), 2);
        assert_eq!(runtime.router().len(), 2);

        let matched = runtime.router().lookup(&Method::DELETE, "/users/7").unwrap();
        let endpoint = runtime.endpoint(matched.endpoint).unwrap();
        assert_eq!(endpoint.method(), &Method::DELETE);
        assert!(endpoint.cache().is_some_and(|cache| cache.disabled()));

        let matched = runtime.router().lookup(&Method::GET, "/users/7").unwrap();
        let cache = runtime.endpoint(matched.endpoint).unwrap().cache().unwrap();
        assert_eq!(cache.duration(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_reload_swaps_runtime() {
        let config = GatewayConfig::from_yaml_str(CONFIG).unwrap();
        let handle = RuntimeHandle::new(Runtime::with_store(&config, memory_store()).unwrap());
        let before = handle.load();

        let mut next = config.clone();
        next.endpoints.truncate(1);
        handle.reload(&next).await.unwrap();

        assert_eq!(handle.load().endpoints().len(), 1);
        assert_eq!(before.endpoints().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_runtime() {
        let config = GatewayConfig::from_yaml_str(CONFIG).unwrap();
        let handle = RuntimeHandle::new(Runtime::with_store(&config, memory_store()).unwrap());

        let mut broken = config.clone();
        broken.endpoints[1].method = "GET".to_string();
        assert!(handle.reload(&broken).await.is_err());
        assert_eq!(handle.load().endpoints().len(), 2);
    }

    #[tokio::test]
    async fn test_build_succeeds_while_redis_is_down() {
        let mut config = GatewayConfig::from_yaml_str(CONFIG).unwrap();
        config.store = StoreConfig::Redis(RedisStoreConfig {
            url: "redis://127.0.0.1:1".to_string(),
        });

        let handle = RuntimeHandle::new(Runtime::build(&config).await.unwrap());
        handle.reload(&config).await.unwrap();
        assert_eq!(handle.load().endpoints().len(), 2);
    }
}
