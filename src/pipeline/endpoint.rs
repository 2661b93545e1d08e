//! # Endpoint Service
//!
//! Runs the backends of an endpoint strictly in configured order. Each step hands its
//! request/response snapshot to the next one; a failed `required` backend ends the sequence
//! early, and an expired request deadline aborts the whole pipeline.

use std::time::Duration;

use axum::http::Method;
use tracing::{debug, info};

use super::backend::{Backend, BackendService, ResponsePolicy};
use super::Deadline;
use crate::caching::{Cache, EndpointCache};
use crate::core::config::{parse_method, EndpointConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Request, Response};

/// Compiled endpoint definition
#[derive(Debug, Clone)]
pub struct Endpoint {
    path: String,
    method: Method,
    timeout: Duration,
    policy: ResponsePolicy,
    /// Endpoint cache already merged with the global one
    cache: Option<EndpointCache>,
    backends: Vec<Backend>,
}

impl Endpoint {
    pub fn from_config(
        config: &EndpointConfig,
        global_cache: Option<&Cache>,
        default_timeout: Duration,
    ) -> GatewayResult<Self> {
        let method = parse_method(&config.method).ok_or_else(|| {
            GatewayError::config(format!(
                "endpoint {}: invalid method '{}'",
                config.path, config.method
            ))
        })?;

        let backends = config
            .backends
            .iter()
            .map(Backend::from_config)
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(Self {
            path: config.path.clone(),
            method,
            timeout: config.timeout.unwrap_or(default_timeout),
            policy: ResponsePolicy::new(
                config.aggregate_responses,
                config.acceptable_status_codes.clone(),
            ),
            cache: EndpointCache::merge(global_cache, config.cache.as_ref()),
            backends,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// `METHOD path`, used in logs and metric labels
    pub fn name(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn policy(&self) -> &ResponsePolicy {
        &self.policy
    }

    pub fn cache(&self) -> Option<&EndpointCache> {
        self.cache.as_ref()
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }
}

/// Sequences the backend calls of an endpoint
#[derive(Debug, Clone)]
pub struct EndpointService {
    backend_service: BackendService,
}

impl EndpointService {
    pub fn new(backend_service: BackendService) -> Self {
        Self { backend_service }
    }

    pub async fn execute(&self, request: Request, endpoint: &Endpoint) -> GatewayResult<Response> {
        let deadline = Deadline::after(endpoint.timeout());
        let total = endpoint.backends().len();

        let mut request = request;
        let mut response = Response::new();
        let mut executed = 0;

        for backend in endpoint.backends() {
            let (next_request, next_response) = self
                .backend_service
                .execute(request, response, backend, endpoint.policy(), &deadline)
                .await?;
            request = next_request;
            response = next_response;
            executed += 1;

            let failed = response
                .history()
                .last()
                .is_some_and(|last| !endpoint.policy().is_acceptable(last.status()));

            if failed && backend.required() {
                info!(
                    endpoint = %endpoint.name(),
                    backend = %backend.name(),
                    executed,
                    total,
                    "Required backend failed, stopping pipeline"
                );
                break;
            }
        }

        debug!(endpoint = %endpoint.name(), executed, total, success = response.success(), "Pipeline finished");
        Ok(response.with_complete(executed == total))
    }
}
