//! HTTP forwarding through a live gateway listener.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adaptive_gateway::admin::setup_admin_router;
use adaptive_gateway::config::Protocol;
use adaptive_gateway::resilience::CircuitState;
use adaptive_gateway::routing::RoutingStrategy;
use common::*;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_forwards_with_correlation_id() {
    let seen = Arc::new(Mutex::new(String::new()));
    let captured = seen.clone();
    let (backend_addr, calls) = start_programmable_backend(move |head| {
        *captured.lock().unwrap() = head;
        async { (200, "planned".to_string()) }
    })
    .await;

    let mut users = route("planning", "/api/planning/*", "planning", Protocol::Http);
    users.strip_prefix = true;
    let gateway = start_gateway(config(
        vec![users],
        vec![backend("planning-a", "planning", backend_addr, 1.0, 10.0)],
    ))
    .await;

    let response = client()
        .get(gateway.url("/api/planning/plans?page=2"))
        .header("x-request-id", "client-chosen")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("response carries a request id");
    assert_ne!(request_id, "client-chosen");
    assert!(uuid::Uuid::parse_str(&request_id).is_ok());
    assert_eq!(response.text().await.unwrap(), "planned");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let head = seen.lock().unwrap().to_lowercase();
    assert!(head.starts_with("get /plans?page=2 http/1.1"), "head: {}", head);
    assert!(head.contains(&format!("x-request-id: {}", request_id)));
    assert!(head.contains(&format!("host: {}", backend_addr)));
    assert!(!head.contains(&format!("host: {}", gateway.addr)));
}

#[tokio::test]
async fn test_cost_strategy_picks_cheaper_backend() {
    let (expensive_addr, expensive_calls) = start_mock_backend("expensive").await;
    let (cheap_addr, cheap_calls) = start_mock_backend("cheap").await;

    let mut search = route("search", "/search", "search", Protocol::Http);
    search.strategy = RoutingStrategy::CostOptimized;
    let gateway = start_gateway(config(
        vec![search],
        vec![
            backend("search-expensive", "search", expensive_addr, 5.0, 10.0),
            backend("search-cheap", "search", cheap_addr, 1.0, 400.0),
        ],
    ))
    .await;

    let client = client();
    for _ in 0..3 {
        let response = client.get(gateway.url("/search")).send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "cheap");
    }

    assert_eq!(cheap_calls.load(Ordering::SeqCst), 3);
    assert_eq!(expensive_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_open_breaker_short_circuits() {
    let (backend_addr, calls) = start_mock_backend("never").await;
    let gateway = start_gateway(config(
        vec![route("orders", "/orders/*", "orders", Protocol::Http)],
        vec![backend("orders-a", "orders", backend_addr, 1.0, 10.0)],
    ))
    .await;

    let breaker = gateway.state.breakers.get("orders-a");
    for _ in 0..gateway.state.breakers.settings().failure_threshold {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let response = client().get(gateway.url("/orders/42")).send().await.unwrap();

    assert_eq!(response.status(), 503);
    assert_eq!(response.headers()["x-gateway-error"], "circuit_open");
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_client_errors_count_as_success() {
    let (backend_addr, calls) =
        start_programmable_backend(|_| async { (404, "missing".to_string()) }).await;

    let mut cfg = config(
        vec![route("items", "/items/*", "items", Protocol::Http)],
        vec![backend("items-a", "items", backend_addr, 1.0, 10.0)],
    );
    cfg.circuit_breaker.failure_threshold = 2;
    let gateway = start_gateway(cfg).await;

    let client = client();
    for _ in 0..4 {
        let response = client.get(gateway.url("/items/x")).send().await.unwrap();
        assert_eq!(response.status(), 404);
        assert!(response.headers().get("x-gateway-error").is_none());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let snapshot = gateway.state.breakers.snapshot("items-a").unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test]
async fn test_server_errors_open_breaker() {
    let (backend_addr, calls) =
        start_programmable_backend(|_| async { (500, "boom".to_string()) }).await;

    let mut cfg = config(
        vec![route("billing", "/billing", "billing", Protocol::Http)],
        vec![backend("billing-a", "billing", backend_addr, 1.0, 10.0)],
    );
    cfg.circuit_breaker.failure_threshold = 2;
    let gateway = start_gateway(cfg).await;

    let client = client();
    for _ in 0..2 {
        let response = client.get(gateway.url("/billing")).send().await.unwrap();
        assert_eq!(response.status(), 500);
    }
    assert_eq!(gateway.state.breakers.state("billing-a"), CircuitState::Open);

    let response = client.get(gateway.url("/billing")).send().await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.headers()["x-gateway-error"], "circuit_open");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let (backend_addr, _calls) = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".to_string())
    })
    .await;

    let mut cfg = config(
        vec![route("reports", "/reports", "reports", Protocol::Http)],
        vec![backend("reports-a", "reports", backend_addr, 1.0, 10.0)],
    );
    cfg.timeouts.request_secs = 1;
    let gateway = start_gateway(cfg).await;

    let response = client().get(gateway.url("/reports")).send().await.unwrap();

    assert_eq!(response.status(), 504);
    assert_eq!(response.headers()["x-gateway-error"], "upstream_timeout");
    assert_eq!(gateway.state.breakers.snapshot("reports-a").unwrap().failure_count, 1);
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let dead = unused_addr().await;
    let gateway = start_gateway(config(
        vec![route("ghost", "/ghost", "ghost", Protocol::Http)],
        vec![backend("ghost-a", "ghost", dead, 1.0, 10.0)],
    ))
    .await;

    let response = client().get(gateway.url("/ghost")).send().await.unwrap();

    assert_eq!(response.status(), 502);
    assert_eq!(response.headers()["x-gateway-error"], "upstream_connect");
    assert_eq!(gateway.state.breakers.snapshot("ghost-a").unwrap().failure_count, 1);
}

#[tokio::test]
async fn test_unmatched_path_is_not_found() {
    let (backend_addr, calls) = start_mock_backend("unused").await;
    let gateway = start_gateway(config(
        vec![route("users", "/users/*", "users", Protocol::Http)],
        vec![backend("users-a", "users", backend_addr, 1.0, 10.0)],
    ))
    .await;

    let response = client().get(gateway.url("/nowhere")).send().await.unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(response.headers()["x-gateway-error"], "no_route");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_health_endpoint_reports_degraded() {
    let (backend_addr, _calls) = start_mock_backend("ok").await;
    let gateway = start_gateway(config(
        vec![route("users", "/users/*", "users", Protocol::Http)],
        vec![backend("users-a", "users", backend_addr, 1.0, 10.0)],
    ))
    .await;

    let client = client();
    let body: serde_json::Value = client
        .get(gateway.url("/gateway/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    let breaker = gateway.state.breakers.get("users-a");
    for _ in 0..gateway.state.breakers.settings().failure_threshold {
        breaker.record_failure();
    }

    let body: serde_json::Value = client
        .get(gateway.url("/gateway/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["breakers"]["users-a"], "OPEN");
}

#[tokio::test]
async fn test_admin_requires_key_and_resets_breaker() {
    let (backend_addr, _calls) = start_mock_backend("ok").await;
    let mut cfg = config(
        vec![route("users", "/users/*", "users", Protocol::Http)],
        vec![backend("users-a", "users", backend_addr, 1.0, 10.0)],
    );
    cfg.admin.api_key = "test-key".into();
    let gateway = start_gateway(cfg).await;

    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();
    let admin = setup_admin_router(gateway.state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(admin_listener, admin).await;
    });

    let breaker = gateway.state.breakers.get("users-a");
    for _ in 0..gateway.state.breakers.settings().failure_threshold {
        breaker.record_failure();
    }

    let client = client();
    let url = format!("http://{}/admin/breakers/users-a/reset", admin_addr);

    let response = client.post(&url).send().await.unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .post(&url)
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(breaker.state(), CircuitState::Open);

    let response = client
        .post(&url)
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(breaker.state(), CircuitState::Closed);

    let response = client
        .post(format!("http://{}/admin/breakers/unknown/reset", admin_addr))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
