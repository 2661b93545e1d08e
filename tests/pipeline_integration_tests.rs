//! # Pipeline Integration Tests
//!
//! Endpoints with several backends against mock upstreams: modifier scopes across backend
//! steps, required backends, deadlines and aggregation.

use std::time::Duration;

use axum::http::{Method, StatusCode};
use gopen_gateway::core::values::{Body, Header, Params};
use gopen_gateway::pipeline::{BackendService, Endpoint, EndpointService};
use gopen_gateway::{GatewayConfig, GatewayError, GatewayResult, Request, Response};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn compile(yaml: &str) -> Endpoint {
    let config = GatewayConfig::from_yaml_str(yaml).unwrap();
    Endpoint::from_config(
        &config.endpoints[0],
        config.cache.as_ref(),
        config.server.default_timeout,
    )
    .unwrap()
}

async fn execute(endpoint: &Endpoint, request: Request) -> GatewayResult<Response> {
    EndpointService::new(BackendService::new().unwrap())
        .execute(request, endpoint)
        .await
}

fn get(path: &str) -> Request {
    Request::new(Method::GET, path, None, Header::new(), None)
}

#[tokio::test]
async fn test_global_header_reaches_next_backend_and_local_does_not() {
    let server = MockServer::start().await;
    Mock::given(path("/a"))
        .and(header("X-Global", "g"))
        .and(header("X-Local", "l"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"step": "a"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/b"))
        .and(header("X-Global", "g"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"step": "b"})))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = compile(&format!(
        r#"
endpoints:
  - path: /steps
    backends:
      - name: a
        hosts: ["{uri}"]
        path: /a
        modifiers:
          request:
            - scope: GLOBAL
              target: HEADER
              action: SET
              key: X-Global
              value: g
            - target: HEADER
              action: SET
              key: X-Local
              value: l
      - name: b
        hosts: ["{uri}"]
        path: /b
"#,
        uri = server.uri()
    ));

    let response = execute(&endpoint, get("/steps")).await.unwrap();
    assert!(response.complete());
    assert!(response.success());

    let requests = server.received_requests().await.unwrap();
    let to_b = requests.iter().find(|r| r.url.path() == "/b").unwrap();
    assert!(to_b.headers.get("x-local").is_none());
    assert_eq!(to_b.headers.get("x-global").unwrap().to_str().unwrap(), "g");
}

#[tokio::test]
async fn test_required_backend_timeout_stops_sequence() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    Mock::given(path("/never"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let endpoint = compile(&format!(
        r#"
endpoints:
  - path: /orders
    timeout: 5s
    backends:
      - name: slow
        hosts: ["{uri}"]
        path: /slow
        required: true
        timeout: 50ms
      - name: never
        hosts: ["{uri}"]
        path: /never
        required: true
"#,
        uri = server.uri()
    ));

    let response = execute(&endpoint, get("/orders")).await.unwrap();

    assert!(!response.complete());
    assert!(!response.success());
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.history().len(), 1);
}

#[tokio::test]
async fn test_request_deadline_aborts_pipeline() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let endpoint = compile(&format!(
        r#"
endpoints:
  - path: /orders
    timeout: 50ms
    backends:
      - name: slow
        hosts: ["{uri}"]
        path: /slow
"#,
        uri = server.uri()
    ));

    let result = execute(&endpoint, get("/orders")).await;
    assert!(matches!(result, Err(GatewayError::Timeout { .. })));
}

#[tokio::test]
async fn test_previous_response_feeds_next_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "abc"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/42"))
        .and(header("Authorization", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "secret": "s"})))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = compile(&format!(
        r##"
endpoints:
  - path: /users/:id
    backends:
      - name: auth
        hosts: ["{uri}"]
        path: /login
        method: POST
      - name: user
        hosts: ["{uri}"]
        path: /v1/users/:id
        method: GET
        modifiers:
          request:
            - target: HEADER
              action: SET
              key: Authorization
              value: "#responses.0.body.token"
          response:
            - target: BODY
              action: REMOVE
              key: secret
            - scope: GLOBAL
              target: HEADER
              action: SET
              key: X-Served-By
              value: user
"##,
        uri = server.uri()
    ));

    let request = get("/users/42").with_params(Params::from_pairs([("id", "42")]));
    let response = execute(&endpoint, request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), Some(&Body::json(json!({"id": 42}))));
    assert_eq!(response.header().get("X-Served-By"), Some("user"));
    assert!(response.complete());
}

#[tokio::test]
async fn test_aggregate_with_acceptable_status_codes() {
    let server = MockServer::start().await;
    Mock::given(path("/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Ana"})))
        .mount(&server)
        .await;
    Mock::given(path("/avatar"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&server)
        .await;

    let endpoint = compile(&format!(
        r#"
endpoints:
  - path: /me
    aggregate_responses: true
    acceptable_status_codes: [200, 404]
    backends:
      - name: profile
        hosts: ["{uri}"]
        path: /profile
      - name: avatar
        hosts: ["{uri}"]
        path: /avatar
"#,
        uri = server.uri()
    ));

    let response = execute(&endpoint, get("/me")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.success());
    assert_eq!(
        response.body(),
        Some(&Body::json(json!({"profile": {"name": "Ana"}, "avatar": "missing"})))
    );

    let rendered = response.into_gateway_response();
    assert_eq!(rendered.header.get("X-GOpen-Complete"), Some("true"));
    assert_eq!(rendered.header.get("X-GOpen-Success"), Some("true"));
}
