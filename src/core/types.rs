//! # Core Types
//!
//! Snapshots of the HTTP state a request passes through: the pipeline-wide [`Request`] and
//! [`Response`], the per-backend [`BackendRequest`] and [`BackendResponse`], and the final
//! [`GatewayResponse`] written to the client or the cache.
//!
//! ## Key Features
//! - Value semantics: every `with_*` method consumes a snapshot and returns the next one
//! - The backend step currently executing lives in `current` until it is committed to history
//! - Committed history entries are shared through `Arc` and never change again

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body as AxumBody;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::core::values::{Body, Header, Params, Query, UrlPath};

pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";
pub const X_TRACE_ID: &str = "X-Trace-Id";
pub const X_GOPEN_CACHE: &str = "X-GOpen-Cache";
pub const X_GOPEN_CACHE_TTL: &str = "X-GOpen-Cache-TTL";
pub const X_GOPEN_COMPLETE: &str = "X-GOpen-Complete";
pub const X_GOPEN_SUCCESS: &str = "X-GOpen-Success";
pub const CACHE_CONTROL: &str = "Cache-Control";
pub const CONTENT_TYPE: &str = "Content-Type";

const HOP_BY_HOP: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Headers that belong to a single connection and are never forwarded
pub fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Client-facing request state shared by every backend step
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    /// Path plus raw query, as received
    url: String,
    path: String,
    header: Header,
    query: Query,
    body: Option<Body>,
    params: Params,
    history: Vec<Arc<BackendRequest>>,
    current: Option<BackendRequest>,
}

impl Request {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        raw_query: Option<&str>,
        header: Header,
        body: Option<Body>,
    ) -> Self {
        let path = path.into();
        let raw_query = raw_query.filter(|q| !q.is_empty());
        let url = match raw_query {
            Some(query) => format!("{}?{}", path, query),
            None => path.clone(),
        };

        Self {
            method,
            url,
            path,
            header,
            query: raw_query.map(Query::parse).unwrap_or_default(),
            body,
            params: Params::default(),
            history: Vec::new(),
            current: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn history(&self) -> &[Arc<BackendRequest>] {
        &self.history
    }

    /// The backend request being built for the step in progress
    pub fn current(&self) -> Option<&BackendRequest> {
        self.current.as_ref()
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Option<Body>) -> Self {
        self.body = body;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_current(mut self, backend_request: BackendRequest) -> Self {
        self.current = Some(backend_request);
        self
    }

    /// Apply `f` to the current backend request, if a step is in progress
    pub fn map_current(mut self, f: impl FnOnce(BackendRequest) -> BackendRequest) -> Self {
        self.current = self.current.take().map(f);
        self
    }

    /// Close the current step, freezing its backend request into history
    pub fn commit_current(mut self) -> Self {
        if let Some(current) = self.current.take() {
            self.history.push(Arc::new(current));
        }
        self
    }
}

/// The request actually sent to one upstream
#[derive(Debug, Clone)]
pub struct BackendRequest {
    backend: String,
    host: String,
    method: Method,
    path: UrlPath,
    header: Header,
    query: Query,
    body: Option<Body>,
    params: Params,
}

impl BackendRequest {
    /// Derive a backend request from the pipeline state
    pub fn from_request(
        request: &Request,
        backend: impl Into<String>,
        host: impl Into<String>,
        method: Method,
        path: UrlPath,
    ) -> Self {
        Self {
            backend: backend.into(),
            host: host.into(),
            method,
            path,
            header: request.header().filter(|name| !is_hop_by_hop(name)),
            query: request.query().clone(),
            body: request.body().cloned(),
            params: request.params().clone(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &UrlPath {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Full upstream URL: host, resolved path template and encoded query
    pub fn url(&self) -> String {
        let mut url = format!(
            "{}{}",
            self.host.trim_end_matches('/'),
            self.path.resolve(&self.params)
        );
        if !self.query.is_empty() {
            url.push('?');
            url.push_str(&self.query.encode());
        }
        url
    }

    pub fn with_path(mut self, path: UrlPath) -> Self {
        self.path = path;
        self
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Option<Body>) -> Self {
        self.body = body;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// What one upstream answered, or the synthetic failure recorded in its place
#[derive(Debug, Clone)]
pub struct BackendResponse {
    backend: String,
    status: StatusCode,
    header: Header,
    body: Option<Body>,
    latency: Duration,
    error: Option<String>,
}

impl BackendResponse {
    pub fn new(
        backend: impl Into<String>,
        status: StatusCode,
        header: Header,
        body: Option<Body>,
        latency: Duration,
    ) -> Self {
        Self {
            backend: backend.into(),
            status,
            header,
            body,
            latency,
            error: None,
        }
    }

    /// Transport failure or backend timeout, carried as an error status
    pub fn failed(
        backend: impl Into<String>,
        status: StatusCode,
        error: impl Into<String>,
        latency: Duration,
    ) -> Self {
        let error = error.into();
        Self {
            backend: backend.into(),
            status,
            header: Header::new(),
            body: Some(Body::json(json!({ "error": error }))),
            latency,
            error: Some(error),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    pub fn with_body(mut self, body: Option<Body>) -> Self {
        self.body = body;
        self
    }
}

/// Pipeline-wide response accumulated across backend steps
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    header: Header,
    body: Option<Body>,
    history: Vec<Arc<BackendResponse>>,
    current: Option<BackendResponse>,
    complete: bool,
    success: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            header: Header::new(),
            body: None,
            history: Vec::new(),
            current: None,
            complete: false,
            success: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn history(&self) -> &[Arc<BackendResponse>] {
        &self.history
    }

    pub fn current(&self) -> Option<&BackendResponse> {
        self.current.as_ref()
    }

    /// All configured backends executed
    pub fn complete(&self) -> bool {
        self.complete
    }

    /// Every executed backend returned an acceptable status
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    pub fn with_body(mut self, body: Option<Body>) -> Self {
        self.body = body;
        self
    }

    pub fn with_complete(mut self, complete: bool) -> Self {
        self.complete = complete;
        self
    }

    pub fn with_current(mut self, backend_response: BackendResponse) -> Self {
        self.current = Some(backend_response);
        self
    }

    pub fn map_current(mut self, f: impl FnOnce(BackendResponse) -> BackendResponse) -> Self {
        self.current = self.current.take().map(f);
        self
    }

    /// Fold the current backend response into the pipeline response.
    ///
    /// Passthrough takes the status and body of the backend. Aggregation keys each body by
    /// backend name and keeps the status of the last unacceptable backend. Headers are overlaid
    /// in both modes.
    pub fn merge_current(mut self, aggregate: bool, acceptable: bool) -> Self {
        let Some(current) = self.current.as_ref() else {
            return self;
        };

        let header = self
            .header
            .merge(&current.header.filter(|name| !is_hop_by_hop(name)));

        if aggregate {
            let mut object = match self.body.as_ref().and_then(Body::as_json) {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            object.insert(
                current.backend.clone(),
                current
                    .body
                    .as_ref()
                    .map(Body::to_json_value)
                    .unwrap_or(Value::Null),
            );
            if !acceptable {
                self.status = current.status;
            }
            self.body = Some(Body::json(Value::Object(object)));
        } else {
            self.status = current.status;
            self.body = current.body.clone();
        }

        self.header = header;
        self.success &= acceptable;
        self
    }

    /// Close the current step, freezing its backend response into history
    pub fn commit_current(mut self) -> Self {
        if let Some(current) = self.current.take() {
            self.history.push(Arc::new(current));
        }
        self
    }

    /// Render the final client response with the outcome flags
    pub fn into_gateway_response(self) -> GatewayResponse {
        let mut header = self
            .header
            .filter(|name| !is_hop_by_hop(name))
            .set(X_GOPEN_COMPLETE, self.complete.to_string())
            .set(X_GOPEN_SUCCESS, self.success.to_string());

        if let Some(content_type) = self.body.as_ref().and_then(Body::content_type) {
            header = header.set(CONTENT_TYPE, content_type);
        }

        GatewayResponse {
            status: self.status,
            header,
            body: self.body.as_ref().map(Body::to_bytes).unwrap_or_default(),
        }
    }
}

/// Final response as written to the client or stored in the cache
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub header: Header,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: StatusCode, header: Header, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            header,
            body: body.into(),
        }
    }

    /// Error response for a pipeline that could not finish
    pub fn incomplete(error: &crate::core::error::GatewayError) -> Self {
        let body = json!({
            "error": {
                "code": error.status_code().as_u16(),
                "message": error.to_string(),
                "type": error.error_type(),
            }
        });
        let header = Header::new()
            .set(CONTENT_TYPE, "application/json")
            .set(X_GOPEN_COMPLETE, "false")
            .set(X_GOPEN_SUCCESS, "false");

        Self::new(
            error.status_code(),
            header,
            serde_json::to_vec(&body).unwrap_or_default(),
        )
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> AxumResponse {
        let mut response = AxumResponse::new(AxumBody::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.header.to_http();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_request() -> Request {
        Request::new(
            Method::GET,
            "/users/42",
            Some("page=2"),
            Header::from_pairs([("Host", "gateway"), ("X-Api-Key", "secret")]),
            None,
        )
        .with_params(Params::from_pairs([("id", "42")]))
    }

    #[test]
    fn test_request_url_includes_raw_query() {
        let request = create_test_request();
        assert_eq!(request.url(), "/users/42?page=2");
        assert_eq!(request.path(), "/users/42");
        assert_eq!(request.query().get("page"), Some("2"));

        let bare = Request::new(Method::GET, "/a", Some(""), Header::new(), None);
        assert_eq!(bare.url(), "/a");
    }

    #[test]
    fn test_backend_request_drops_hop_by_hop_headers() {
        let request = create_test_request();
        let backend = BackendRequest::from_request(
            &request,
            "users",
            "http://users:8080/",
            Method::GET,
            UrlPath::new("/v1/users/:id"),
        );

        assert!(!backend.header().contains("host"));
        assert_eq!(backend.header().get("x-api-key"), Some("secret"));
        assert_eq!(backend.url(), "http://users:8080/v1/users/42?page=2");
    }

    #[test]
    fn test_commit_moves_current_into_history() {
        let request = create_test_request();
        let backend = BackendRequest::from_request(
            &request,
            "users",
            "http://users",
            Method::GET,
            UrlPath::new("/users"),
        );

        let request = request.with_current(backend).commit_current();
        assert!(request.current().is_none());
        assert_eq!(request.history().len(), 1);
        assert_eq!(request.history()[0].backend(), "users");
    }

    #[test]
    fn test_passthrough_merge_takes_last_backend() {
        let first = BackendResponse::new(
            "a",
            StatusCode::OK,
            Header::from_pairs([("X-A", "1")]),
            Some(Body::json(json!({"a": 1}))),
            Duration::ZERO,
        );
        let second = BackendResponse::new(
            "b",
            StatusCode::CREATED,
            Header::from_pairs([("X-B", "2"), ("Transfer-Encoding", "chunked")]),
            Some(Body::json(json!({"b": 2}))),
            Duration::ZERO,
        );

        let response = Response::new()
            .with_current(first)
            .merge_current(false, true)
            .commit_current()
            .with_current(second)
            .merge_current(false, true)
            .commit_current();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.body(), Some(&Body::json(json!({"b": 2}))));
        assert!(response.header().contains("X-A"));
        assert!(response.header().contains("X-B"));
        assert!(!response.header().contains("Transfer-Encoding"));
        assert_eq!(response.history().len(), 2);
        assert!(response.success());
    }

    #[test]
    fn test_aggregate_merge_keys_bodies_by_backend() {
        let ok = BackendResponse::new(
            "profile",
            StatusCode::OK,
            Header::new(),
            Some(Body::json(json!({"name": "Ana"}))),
            Duration::ZERO,
        );
        let failed = BackendResponse::failed(
            "orders",
            StatusCode::BAD_GATEWAY,
            "connection refused",
            Duration::ZERO,
        );

        let response = Response::new()
            .with_current(ok)
            .merge_current(true, true)
            .commit_current()
            .with_current(failed)
            .merge_current(true, false)
            .commit_current();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(!response.success());
        assert_eq!(
            response.body().and_then(Body::as_json),
            Some(&json!({
                "profile": {"name": "Ana"},
                "orders": {"error": "connection refused"}
            }))
        );
    }

    #[test]
    fn test_gateway_response_carries_flags() {
        let response = Response::new()
            .with_body(Some(Body::json(json!({"ok": true}))))
            .with_complete(true)
            .into_gateway_response();

        assert_eq!(response.header.get(X_GOPEN_COMPLETE), Some("true"));
        assert_eq!(response.header.get(X_GOPEN_SUCCESS), Some("true"));
        assert_eq!(response.header.get(CONTENT_TYPE), Some("application/json"));
        assert_eq!(response.body, Bytes::from_static(br#"{"ok":true}"#));
    }
}
