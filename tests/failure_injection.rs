//! Failure injection tests for the gateway.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use resilient_gateway::store::MemoryStore;

mod common;

#[tokio::test]
async fn test_retry_on_failure() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let backend = common::start_programmable_backend(move |req| {
        let cc = cc.clone();
        async move {
            let count = cc.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.header("x-retry-attempt"), Some((count + 1).to_string().as_str()));
            if count < 2 {
                (503, r#"{"errors":[{"message":"unavailable"}]}"#.into())
            } else {
                (200, r#"{"data":{"ok":true}}"#.into())
            }
        }
    })
    .await;

    let gateway = common::start_gateway(common::test_config(backend), Arc::new(MemoryStore::new())).await;
    let client = common::client();

    let res = client
        .post(gateway.url("/query"))
        .json(&json!({"query": "{ ok }"}))
        .send()
        .await
        .expect("Gateway unreachable");

    assert_eq!(res.status(), 200, "Should eventually succeed after retries");
    assert_eq!(res.headers()["x-retry-attempt"], "3");
    assert_eq!(res.headers()["x-retry-result"], "success");
    assert_eq!(call_count.load(Ordering::SeqCst), 3);

    let metrics: Value = client
        .get(gateway.url("/health/retries"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let gateway_metrics = &metrics["retry_metrics"]["api-gateway"];
    assert_eq!(gateway_metrics["total_attempts"], 3);
    assert_eq!(gateway_metrics["successful_ops"], 1);
    assert_eq!(gateway_metrics["failed_ops"], 0);
    assert!(metrics["timestamp"].is_string());
}

#[tokio::test]
async fn test_retries_exhausted_replays_last_response() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let backend = common::start_programmable_backend(move |_req| {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (502, r#"{"errors":[{"message":"bad gateway"}]}"#.into())
        }
    })
    .await;

    let gateway = common::start_gateway(common::test_config(backend), Arc::new(MemoryStore::new())).await;
    let res = common::client()
        .post(gateway.url("/query"))
        .json(&json!({"query": "{ ok }"}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 502);
    assert_eq!(res.headers()["x-retry-result"], "failed");
    assert_eq!(res.headers()["x-retry-attempt"], "3");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["errors"][0]["message"], "bad gateway");
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_circuit_opens_after_failures() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let backend = common::start_programmable_backend(move |_req| {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (500, r#"{"errors":[{"message":"boom"}]}"#.into())
        }
    })
    .await;

    let mut config = common::test_config(backend);
    config.circuit_breaker.gateway.max_failures = 2;
    config.circuit_breaker.gateway.open_timeout_ms = 60_000;
    config.retries.gateway.max_attempts = 1;
    let gateway = common::start_gateway(config, Arc::new(MemoryStore::new())).await;
    let client = common::client();

    for _ in 0..2 {
        let res = client
            .post(gateway.url("/query"))
            .json(&json!({"query": "{ ok }"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 500);
        assert_eq!(res.headers()["x-retry-result"], "failed");
    }

    let rejected = client
        .post(gateway.url("/query"))
        .json(&json!({"query": "{ ok }"}))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 503);
    assert_eq!(rejected.headers()["x-circuit-breaker-state"], "open");
    assert_eq!(rejected.headers()["retry-after"], "60");
    let body: Value = rejected.json().await.unwrap();
    let ext = &body["errors"][0]["extensions"];
    assert_eq!(ext["code"], "CIRCUIT_BREAKER_OPEN");
    assert_eq!(ext["circuit_state"], "open");
    assert_eq!(ext["retry_after"], 60);

    assert_eq!(call_count.load(Ordering::SeqCst), 2, "Open circuit must not reach the backend");

    let health = client.get(gateway.url("/health/circuit-breakers")).send().await.unwrap();
    assert_eq!(health.status(), 503);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["circuit_breakers"]["api-gateway"]["state"], "open");
    assert!(body["circuit_breakers"]["api-gateway"]["opened_at"].is_string());
}

#[tokio::test]
async fn test_circuit_recovers_through_half_open() {
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let h = healthy.clone();
    let backend = common::start_programmable_backend(move |_req| {
        let h = h.clone();
        async move {
            if h.load(Ordering::SeqCst) {
                (200, r#"{"data":{"ok":true}}"#.into())
            } else {
                (500, r#"{"errors":[{"message":"boom"}]}"#.into())
            }
        }
    })
    .await;

    let mut config = common::test_config(backend);
    config.circuit_breaker.gateway.max_failures = 1;
    config.circuit_breaker.gateway.open_timeout_ms = 300;
    config.circuit_breaker.gateway.max_half_open_probes = 1;
    config.retries.gateway.max_attempts = 1;
    config.cache.enabled = false;
    let gateway = common::start_gateway(config, Arc::new(MemoryStore::new())).await;
    let client = common::client();
    let query = json!({"query": "{ ok }"});

    let res = client.post(gateway.url("/query")).json(&query).send().await.unwrap();
    assert_eq!(res.status(), 500);
    let res = client.post(gateway.url("/query")).json(&query).send().await.unwrap();
    assert_eq!(res.status(), 503);

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let probe = client.post(gateway.url("/query")).json(&query).send().await.unwrap();
    assert_eq!(probe.status(), 200);

    let health: Value = client
        .get(gateway.url("/health/circuit-breakers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["circuit_breakers"]["api-gateway"]["state"], "closed");
    assert_eq!(health["circuit_breakers"]["api-gateway"]["failure_count"], 0);
}

#[tokio::test]
async fn test_store_outage_fails_open() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let backend = common::start_programmable_backend(move |_req| {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (200, r#"{"data":{"ok":true}}"#.into())
        }
    })
    .await;

    let gateway = common::start_gateway(common::test_config(backend), Arc::new(common::FailingStore)).await;
    let client = common::client();
    let query = json!({"query": "{ ok }"});

    for _ in 0..3 {
        let res = client.post(gateway.url("/query")).json(&query).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["x-cache"], "MISS");
        assert!(res.headers().get("x-ratelimit-limit").is_none());
        assert_eq!(res.headers()["x-retry-result"], "success");
    }
    assert_eq!(call_count.load(Ordering::SeqCst), 3);

    let health: Value = client.get(gateway.url("/health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["store"], "down");
}

#[tokio::test]
async fn test_upstream_unreachable() {
    // Bind then drop a listener to get a port nothing listens on.
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let gateway = common::start_gateway(common::test_config(dead), Arc::new(MemoryStore::new())).await;
    let res = common::client()
        .post(gateway.url("/query"))
        .json(&json!({"query": "{ ok }"}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 502);
    assert_eq!(res.headers()["x-retry-result"], "failed");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["errors"][0]["extensions"]["code"], "SERVICE_ERROR");
}
