//! # Backend Service
//!
//! Executes one upstream call of an endpoint:
//! 1. derive the backend request from the pipeline request
//! 2. run request modifiers, `LOCAL` ones first, then `GLOBAL`
//! 3. call the upstream, bounded by the earlier of the request deadline and the backend timeout
//! 4. run response modifiers in declared order; the answer is folded into the pipeline
//!    response right before the first `GLOBAL` one (or after the last modifier)
//! 5. commit the request/response pair to history
//!
//! A transport error or a backend timeout is not an error of the pipeline: it is recorded as
//! a synthetic `502`/`504` response. Only the expiry of the request deadline aborts with
//! [`GatewayError::Timeout`].

use std::time::{Duration, Instant};

use axum::http::{Method, StatusCode};
use reqwest::Client;
use tracing::{debug, warn};

use crate::core::config::{parse_method, BackendConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{is_hop_by_hop, BackendRequest, BackendResponse, Request, Response, CONTENT_TYPE};
use crate::core::values::{Body, Header, UrlPath};
use crate::modifier::{apply_all, Modifier, ModifierContext, ModifierScope};
use crate::observability::metrics;
use crate::pipeline::Deadline;

/// How backend answers are folded into the pipeline response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponsePolicy {
    aggregate: bool,
    acceptable_status_codes: Option<Vec<u16>>,
}

impl ResponsePolicy {
    pub fn new(aggregate: bool, acceptable_status_codes: Option<Vec<u16>>) -> Self {
        Self {
            aggregate,
            acceptable_status_codes,
        }
    }

    pub fn aggregate(&self) -> bool {
        self.aggregate
    }

    /// Listed statuses when configured, anything below 400 otherwise
    pub fn is_acceptable(&self, status: StatusCode) -> bool {
        match &self.acceptable_status_codes {
            Some(codes) => codes.contains(&status.as_u16()),
            None => status.as_u16() < 400,
        }
    }
}

/// Compiled backend definition
#[derive(Debug, Clone)]
pub struct Backend {
    name: String,
    hosts: Vec<String>,
    path: UrlPath,
    method: Option<Method>,
    required: bool,
    timeout: Option<Duration>,
    /// `LOCAL` modifiers followed by `GLOBAL` ones, each group in declared order
    request_modifiers: Vec<Modifier>,
    /// Declared order
    response_modifiers: Vec<Modifier>,
}

impl Backend {
    pub fn from_config(config: &BackendConfig) -> GatewayResult<Self> {
        let method = config
            .method
            .as_deref()
            .map(|method| {
                parse_method(method).ok_or_else(|| {
                    GatewayError::config(format!(
                        "backend '{}': invalid method '{}'",
                        config.name, method
                    ))
                })
            })
            .transpose()?;

        let request = config
            .modifiers
            .request
            .iter()
            .map(|m| Modifier::new(ModifierContext::Request, m))
            .collect::<GatewayResult<Vec<_>>>()?;
        let response_modifiers = config
            .modifiers
            .response
            .iter()
            .map(|m| Modifier::new(ModifierContext::Response, m))
            .collect::<GatewayResult<Vec<_>>>()?;

        let (mut request_modifiers, global_request): (Vec<_>, Vec<_>) = request
            .into_iter()
            .partition(|m| m.scope() == ModifierScope::Local);
        request_modifiers.extend(global_request);

        if config.hosts.is_empty() {
            return Err(GatewayError::config(format!(
                "backend '{}': at least one host is required",
                config.name
            )));
        }

        Ok(Self {
            name: config.name.clone(),
            hosts: config.hosts.clone(),
            path: UrlPath::new(&config.path),
            method,
            required: config.required,
            timeout: config.timeout,
            request_modifiers,
            response_modifiers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn path(&self) -> &UrlPath {
        &self.path
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn request_modifiers(&self) -> &[Modifier] {
        &self.request_modifiers
    }

    pub fn response_modifiers(&self) -> &[Modifier] {
        &self.response_modifiers
    }

    /// Response modifiers before and from the first `GLOBAL` one
    fn split_response_modifiers(&self) -> (&[Modifier], &[Modifier]) {
        let merge_at = self
            .response_modifiers
            .iter()
            .position(|m| m.scope() == ModifierScope::Global)
            .unwrap_or(self.response_modifiers.len());
        self.response_modifiers.split_at(merge_at)
    }

    /// Random pick among the configured hosts
    fn pick_host(&self) -> &str {
        match self.hosts.len() {
            0 => "",
            1 => &self.hosts[0],
            n => &self.hosts[fastrand::usize(..n)],
        }
    }
}

/// Performs upstream calls for backends
#[derive(Debug, Clone)]
pub struct BackendService {
    client: Client,
}

impl BackendService {
    pub fn new() -> GatewayResult<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Run one backend step and return the next pipeline state
    pub async fn execute(
        &self,
        request: Request,
        response: Response,
        backend: &Backend,
        policy: &ResponsePolicy,
        deadline: &Deadline,
    ) -> GatewayResult<(Request, Response)> {
        if deadline.expired() {
            return Err(deadline.error());
        }

        let method = backend
            .method
            .clone()
            .unwrap_or_else(|| request.method().clone());
        let backend_request = BackendRequest::from_request(
            &request,
            backend.name(),
            backend.pick_host(),
            method,
            backend.path().clone(),
        );
        let request = request.with_current(backend_request);
        let (request, response) = apply_all(&backend.request_modifiers, request, response);

        let Some(backend_request) = request.current() else {
            return Err(GatewayError::internal("backend request missing after modifiers"));
        };

        let call_deadline = deadline.bound(backend.timeout);
        let started = Instant::now();
        let outcome = tokio::time::timeout_at(call_deadline, self.call(backend_request)).await;
        let latency = started.elapsed();

        let backend_response = match outcome {
            Ok(Ok((status, header, body))) => {
                BackendResponse::new(backend.name(), status, header, body, latency)
            }
            Ok(Err(e)) => {
                warn!(backend = %backend.name(), url = %backend_request.url(), error = %e, "Backend call failed");
                metrics::record_backend_error(backend.name(), "transport");
                BackendResponse::failed(backend.name(), StatusCode::BAD_GATEWAY, e.to_string(), latency)
            }
            Err(_) if deadline.expired() => {
                warn!(backend = %backend.name(), "Request deadline expired during backend call");
                metrics::record_backend_error(backend.name(), "deadline");
                return Err(deadline.error());
            }
            Err(_) => {
                warn!(backend = %backend.name(), timeout = ?backend.timeout, "Backend call timed out");
                metrics::record_backend_error(backend.name(), "timeout");
                BackendResponse::failed(
                    backend.name(),
                    StatusCode::GATEWAY_TIMEOUT,
                    "backend timeout",
                    latency,
                )
            }
        };

        metrics::record_backend_request(backend.name(), backend_response.status(), latency);
        debug!(
            backend = %backend.name(),
            status = backend_response.status().as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Backend responded"
        );

        let (before_merge, after_merge) = backend.split_response_modifiers();
        let response = response.with_current(backend_response);
        let (request, response) = apply_all(before_merge, request, response);

        let acceptable = response
            .current()
            .is_some_and(|current| policy.is_acceptable(current.status()));
        let response = response.merge_current(policy.aggregate(), acceptable);
        let (request, response) = apply_all(after_merge, request, response);

        Ok((request.commit_current(), response.commit_current()))
    }

    async fn call(
        &self,
        backend_request: &BackendRequest,
    ) -> Result<(StatusCode, Header, Option<Body>), reqwest::Error> {
        let mut builder = self
            .client
            .request(backend_request.method().clone(), backend_request.url());

        for (name, values) in backend_request.header().iter() {
            for value in values {
                builder = builder.header(name, value.as_str());
            }
        }

        if let Some(body) = backend_request.body() {
            if let Some(content_type) = body.content_type() {
                if !backend_request.header().contains(CONTENT_TYPE) {
                    builder = builder.header(CONTENT_TYPE, content_type);
                }
            }
            builder = builder.body(body.to_bytes());
        }

        let upstream = builder.send().await?;
        let status = upstream.status();
        let header = Header::from_http(upstream.headers()).filter(|name| !is_hop_by_hop(name));
        let content_type = header.get(CONTENT_TYPE).map(str::to_string);
        let bytes = upstream.bytes().await?;

        Ok((status, header, Body::from_bytes(bytes, content_type.as_deref())))
    }
}
