// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use http::{Request, Response};
use keel_config::client::{CircuitBreakerConfig, ClientResilienceConfig, RetryConfig};
use keel_config::headers::HeaderNames;
use keel_rpc::RequestIdentity;
use keel_rpc::circuit_breaker::BreakerState;
use keel_rpc::client::{ClientError, PropagateHeadersLayer, ResilientLayer};
use parking_lot::Mutex;
use tower::{BoxError, ServiceBuilder, ServiceExt, service_fn};
use tracing_test::traced_test;

fn request() -> Request<String> {
    Request::builder()
        .method("POST")
        .uri("http://inventory.local/inventory.v1.Stock/Reserve")
        .body("sku=42".to_string())
        .expect("valid request")
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_every_attempt_carries_body_and_identity() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let peer = service_fn(move |req: Request<String>| {
        let recorder = recorder.clone();
        async move {
            let mut seen = recorder.lock();
            let user = req
                .headers()
                .get("x-user-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            seen.push((user, req.body().clone()));
            let status = if seen.len() < 3 { 503 } else { 200 };
            Ok::<_, BoxError>(Response::builder().status(status).body(()).unwrap())
        }
    });

    let config = ClientResilienceConfig::default()
        .with_retry(RetryConfig::new(2, Duration::from_millis(50)));
    let client = ServiceBuilder::new()
        .layer(ResilientLayer::new("inventory", &config).unwrap())
        .layer(PropagateHeadersLayer::new(&config.headers).unwrap())
        .service(peer);

    let mut req = request();
    req.extensions_mut()
        .insert(Arc::new(RequestIdentity::new("u-5")));

    let response = client.oneshot(req).await.unwrap();
    assert_eq!(response.status(), 200);

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert!(
        seen.iter()
            .all(|(user, body)| user == "u-5" && body == "sku=42")
    );
    drop(seen);

    assert!(logs_contain("retrying call"));
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_fails_fast_then_half_open_admits_one_trial() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let peer = service_fn(move |_req: Request<String>| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 3 {
                return Ok::<_, BoxError>(Response::builder().status(500).body(()).unwrap());
            }
            // the trial call is slow, so a concurrent call finds the slot taken
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(Response::builder().status(200).body(()).unwrap())
        }
    });

    let config = ClientResilienceConfig::default()
        .with_retry(RetryConfig::disabled())
        .with_circuit_breaker(CircuitBreakerConfig::enabled(3, Duration::from_secs(10)));
    let layer = ResilientLayer::new("inventory", &config).unwrap();
    let client = ServiceBuilder::new().layer(layer.clone()).service(peer);

    for _ in 0..3 {
        let response = client.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), 500);
    }
    let breaker = layer.circuit_breaker().unwrap();
    assert_eq!(breaker.state(), BreakerState::Open);

    let err = client.clone().oneshot(request()).await.unwrap_err();
    assert!(matches!(err, ClientError::CircuitOpen(ref name) if name == "inventory"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_secs(10)).await;

    let trial = tokio::spawn(client.clone().oneshot(request()));
    tokio::task::yield_now().await;
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    let rejected = client.clone().oneshot(request()).await.unwrap_err();
    assert!(rejected.is_circuit_open());

    let response = trial.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}
