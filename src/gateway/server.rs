//! # Gateway Server
//!
//! The axum application in front of the pipeline. Every request goes through one fallback
//! handler that resolves the endpoint on the current runtime snapshot, builds the pipeline
//! request, and runs the cache middleware around the endpoint service.
//!
//! ## Layers (outermost first)
//! - `TraceLayer` for HTTP spans
//! - trace id / `X-Forwarded-For` propagation
//! - request logging

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::ALLOW;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Router as AxumRouter;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::runtime::RuntimeHandle;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{self, CONTENT_TYPE};
use crate::core::values::{Body, Header};
use crate::observability::{log_requests, metrics};

static TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");
static FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// HTTP server serving the current runtime
pub struct GatewayServer {
    handle: RuntimeHandle,
    app: AxumRouter,
}

impl GatewayServer {
    pub fn new(handle: RuntimeHandle) -> Self {
        let app = build_app(handle.clone());
        Self { handle, app }
    }

    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// Serve until `shutdown` resolves, then close the cache store
    #[instrument(skip_all)]
    pub async fn run<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.handle.load().server().socket_addr()?;
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            GatewayError::internal(format!("Failed to bind gateway server to {}: {}", bind_addr, e))
        })?;
        info!("Gateway HTTP server listening on {}", bind_addr);

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))?;

        info!("Gateway HTTP server stopped, closing cache store");
        self.handle.close().await;
        Ok(())
    }
}

/// Build the axum application for `handle`
pub fn build_app(handle: RuntimeHandle) -> AxumRouter {
    AxumRouter::new()
        .fallback(handle_request)
        .with_state(handle)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(propagate_request_ids))
                .layer(middleware::from_fn(log_requests)),
        )
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Give every request a trace id and a forwarding chain, and echo the trace id back
async fn propagate_request_ids(mut request: Request, next: Next) -> AxumResponse {
    if !request.headers().contains_key(&TRACE_ID) {
        if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            request.headers_mut().insert(TRACE_ID.clone(), value);
        }
    }

    if !request.headers().contains_key(&FORWARDED_FOR) {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        if let Some(Ok(value)) = peer.map(|ip| HeaderValue::from_str(&ip)) {
            request.headers_mut().insert(FORWARDED_FOR.clone(), value);
        }
    }

    let trace_id = request.headers().get(&TRACE_ID).cloned();
    let mut response = next.run(request).await;
    if let Some(trace_id) = trace_id {
        response.headers_mut().insert(TRACE_ID.clone(), trace_id);
    }
    response
}

async fn handle_request(State(handle): State<RuntimeHandle>, request: Request) -> AxumResponse {
    let started = Instant::now();
    let runtime = handle.load();
    let (parts, body) = request.into_parts();

    let matched = match runtime.router().lookup(&parts.method, parts.uri.path()) {
        Ok(matched) => matched,
        Err(e @ GatewayError::MethodNotAllowed { .. }) => {
            let allow = runtime
                .router()
                .allowed_methods(parts.uri.path())
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let mut response = e.into_response();
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(ALLOW, value);
            }
            return response;
        }
        Err(e) => return e.into_response(),
    };

    let Some(endpoint) = runtime.endpoint(matched.endpoint) else {
        return GatewayError::internal("route points to a missing endpoint").into_response();
    };

    let bytes = match axum::body::to_bytes(body, runtime.server().max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return GatewayError::validation("body", "unreadable or too large").into_response();
        }
    };

    let header = Header::from_http(&parts.headers);
    let content_type = header.get(CONTENT_TYPE).map(str::to_string);
    let request = types::Request::new(
        parts.method.clone(),
        parts.uri.path(),
        parts.uri.query(),
        header,
        Body::from_bytes(bytes, content_type.as_deref()),
    )
    .with_params(matched.params);

    let name = endpoint.name();
    debug!(endpoint = %name, url = %request.url(), "Routing request");

    let service = runtime.endpoint_service();
    let pipeline_request = request.clone();
    let response = runtime
        .cache()
        .handle(&name, endpoint.cache(), &request, move || async move {
            service
                .execute(pipeline_request, endpoint)
                .await
                .map(types::Response::into_gateway_response)
        })
        .await;

    metrics::record_request(parts.method.as_str(), &name, response.status, started.elapsed());
    response.into_response()
}
