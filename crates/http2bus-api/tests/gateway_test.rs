//! Integration tests for the composed gateway
//!
//! Run with: cargo test -p http2bus-api --test gateway_test

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use http2bus_agent::{AgentConfig, RoutesAgent};
use http2bus_api::{create_router, BridgeOptions, RouteComposer, CORRELATION_HEADER};
use http2bus_core::{MemoryBus, ResponsePayload, Route};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

// =============================================================================
// Fixture
// =============================================================================

struct Gateway {
    bus: Arc<MemoryBus>,
    composer: Arc<RouteComposer>,
    router: Router,
}

impl Gateway {
    fn new(routes: Value) -> Self {
        let bus = Arc::new(MemoryBus::recording());
        let options = BridgeOptions {
            default_wait_for_responses_ms: 200,
            ..Default::default()
        };
        let composer = Arc::new(RouteComposer::new(bus.clone(), options));
        let routes: Vec<Route> = serde_json::from_value(routes).unwrap();
        composer.load(&routes).unwrap();
        let router = create_router(composer.clone());
        Self {
            bus,
            composer,
            router,
        }
    }

    /// Answer every request on `namespace` with `payload`
    fn responder(&self, namespace: &str, payload: ResponsePayload) {
        let mut requests = self.bus.listen(namespace);
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                request.respond(payload.clone()).await;
            }
        });
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
        (status, headers, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }
}

// =============================================================================
// Bridge Tests
// =============================================================================

#[tokio::test]
async fn test_base_path_is_stripped_from_url() {
    let gateway = Gateway::new(json!([
        { "bus": { "namespace": "test:api", "waitForResponses": 0 }, "http": { "basePath": "/api", "path": "*" } }
    ]));

    for uri in ["/api/something", "/api", "/apiv2"] {
        let (status, _, _) = gateway.get(uri).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let urls: Vec<String> = gateway
        .bus
        .published()
        .into_iter()
        .map(|(_, message)| message.payload.url)
        .collect();
    assert_eq!(urls, vec!["/something", "/", "/v2"]);
}

#[tokio::test]
async fn test_no_response_is_service_unavailable() {
    let gateway = Gateway::new(json!([
        { "bus": { "namespace": "test:quiet" }, "http": { "path": "/quiet" } }
    ]));
    let _requests = gateway.bus.listen("test:quiet");

    let (status, headers, body) = gateway.get("/quiet").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(headers.contains_key(CORRELATION_HEADER));
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_json_round_trip_through_responder() {
    let gateway = Gateway::new(json!([
        { "bus": { "namespace": "test:echo" }, "http": { "basePath": "/api", "path": "/echo", "methods": ["post"] } }
    ]));
    gateway.responder(
        "test:echo",
        ResponsePayload::with_status(201)
            .header("location", "/echo/1")
            .body(json!({ "id": 1 })),
    );

    let request = Request::post("/api/echo?x=1")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-msb-tags", "one,two")
        .body(Body::from(r#"{"hello":"world"}"#))
        .unwrap();
    let (status, headers, body) = gateway.send(request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers[header::LOCATION], "/api/echo/1");
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({ "id": 1 }));

    let (namespace, message) = gateway.bus.published().remove(0);
    assert_eq!(namespace, "test:echo");
    assert_eq!(message.tags[1..], ["one", "two"]);
    assert_eq!(message.payload.url, "/echo?x=1");
    assert_eq!(message.payload.body, Some(json!({ "hello": "world" })));
    assert_eq!(
        headers[CORRELATION_HEADER].to_str().unwrap(),
        message.correlation_id
    );
}

#[tokio::test]
async fn test_configured_tags_follow_request_tags() {
    let gateway = Gateway::new(json!([
        { "bus": { "namespace": "test:tags", "waitForResponses": 0, "tags": ["pre", "one"] }, "http": { "path": "/t" } }
    ]));

    let request = Request::get("/t")
        .header("x-msb-tags", "one,two")
        .body(Body::empty())
        .unwrap();
    gateway.send(request).await;

    let (_, message) = gateway.bus.published().remove(0);
    assert_eq!(message.tags[0], message.correlation_id);
    assert_eq!(message.tags[1..], ["one", "two", "pre"]);
}

#[tokio::test]
async fn test_bus_outage_is_bad_gateway() {
    let gateway = Gateway::new(json!([
        { "bus": { "namespace": "test:down" }, "http": { "path": "/down" } }
    ]));
    gateway.bus.set_connected(false);

    let (status, headers, body) = gateway.get("/down").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(headers.contains_key(CORRELATION_HEADER));
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "bad_gateway");
}

// =============================================================================
// Routing Tests
// =============================================================================

#[tokio::test]
async fn test_unrouted_request_is_not_found() {
    let gateway = Gateway::new(json!([
        { "bus": { "namespace": "test:only" }, "http": { "path": "/only" } }
    ]));

    let (status, _, body) = gateway.get("/elsewhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());

    let (status, _, _) = gateway
        .send(Request::delete("/only").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_preflight_carries_cors_headers() {
    let gateway = Gateway::new(json!([
        { "bus": { "namespace": "test:cors" }, "http": { "path": "/c", "methods": ["put"], "cors": { "origin": "http://app.test" } } }
    ]));

    let request = Request::options("/c")
        .header(header::ORIGIN, "http://app.test")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = gateway.send(request).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://app.test");
    assert!(body.is_empty());
    assert!(gateway.bus.published().is_empty());
}

#[tokio::test]
async fn test_reload_replaces_routes() {
    let gateway = Gateway::new(json!([
        { "bus": { "namespace": "test:old", "waitForResponses": 0 }, "http": { "path": "/old" } }
    ]));
    assert_eq!(gateway.get("/old").await.0, StatusCode::NO_CONTENT);

    let routes: Vec<Route> = serde_json::from_value(json!([
        { "bus": { "namespace": "test:new", "waitForResponses": 0 }, "http": { "path": "/new" } }
    ]))
    .unwrap();
    gateway.composer.load(&routes).unwrap();

    assert_eq!(gateway.get("/old").await.0, StatusCode::NOT_FOUND);
    assert_eq!(gateway.get("/new").await.0, StatusCode::NO_CONTENT);
}

// =============================================================================
// Provider Tests
// =============================================================================

#[tokio::test]
async fn test_provider_serves_agent_routes() {
    let gateway = Gateway::new(json!([
        { "provider": { "name": "inventory" }, "http": { "basePath": "/sub-api" } }
    ]));
    gateway.responder("inventory:items", ResponsePayload::default().body("stock"));

    let agent = RoutesAgent::create(
        AgentConfig {
            name: "inventory".to_string(),
            ttl: 60_000,
            updated_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        },
        gateway.bus.clone(),
    );
    let routes: Vec<Route> = serde_json::from_value(json!([
        { "bus": { "namespace": "inventory:items" }, "http": { "path": "/items/:sku" } }
    ]))
    .unwrap();
    agent.load(routes).await.unwrap();

    let provider = gateway.composer.providers().remove(0);
    for _ in 0..100 {
        if provider.composer().is_loaded() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, _, body) = gateway.get("/sub-api/items/abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"stock");

    let (_, message) = gateway.bus.published().remove(0);
    assert_eq!(message.payload.url, "/items/abc");
    assert_eq!(message.payload.params["sku"], "abc");
    assert!(message.tags.contains(&"inventory".to_string()));

    let (status, _, _) = gateway.get("/sub-api/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// End-to-end Tests
// =============================================================================

#[tokio::test]
async fn test_serves_over_tcp() {
    let gateway = Gateway::new(json!([
        { "bus": { "namespace": "test:hello" }, "http": { "path": "/hello" } }
    ]));
    gateway.responder(
        "test:hello",
        ResponsePayload::default()
            .header("content-type", "text/plain")
            .body("hi"),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let router = gateway.router.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let response = reqwest::get(format!("http://{}/hello", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key(CORRELATION_HEADER));
    assert_eq!(response.text().await.unwrap(), "hi");

    shutdown_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
