//! Integration tests for handle lifecycle and request correlation
//!
//! These run against a localhost mock endpoint; no external network.

mod common;

use common::{refused_endpoint, wait_until, MockServerOptions, MockWsServer};
use longwire::{
    ChannelKind, ConnectionConfig, ConnectionRegistry, ConnectionState, EventFilter,
    LongwireError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn fast_duplex(url: String) -> ConnectionConfig {
    let mut config = ConnectionConfig::duplex(url);
    config.heartbeat_interval = Duration::from_secs(5);
    config.heartbeat_timeout = Duration::from_secs(2);
    config.connect_timeout = Duration::from_secs(2);
    config.request_timeout = Duration::from_secs(5);
    config.reconnect.base_delay = Duration::from_millis(50);
    config.reconnect.jitter_ratio = 0.0;
    config.close_grace = Duration::from_secs(2);
    config
}

#[test]
fn invalid_configs_are_rejected_without_io() {
    let mut missing_url = ConnectionConfig::duplex("");
    missing_url.duplex_url = Some(String::new());
    assert!(matches!(
        missing_url.validate(),
        Err(LongwireError::ConfigInvalid(_))
    ));

    let mut bad_pool = ConnectionConfig::pooled("http://127.0.0.1:1");
    bad_pool.pool_min = 10;
    bad_pool.pool_max = 2;
    assert!(matches!(
        bad_pool.validate(),
        Err(LongwireError::ConfigInvalid(_))
    ));

    let mut bad_jitter = ConnectionConfig::duplex("ws://127.0.0.1:1");
    bad_jitter.reconnect.jitter_ratio = 1.5;
    assert!(matches!(
        bad_jitter.validate(),
        Err(LongwireError::ConfigInvalid(_))
    ));

    let mut zero_budget = ConnectionConfig::duplex("ws://127.0.0.1:1");
    zero_budget.reconnect.max_attempts = Some(0);
    assert!(matches!(
        zero_budget.validate(),
        Err(LongwireError::ConfigInvalid(_))
    ));

    // hybrid requires both endpoints
    let mut half_hybrid = ConnectionConfig::duplex("ws://127.0.0.1:1");
    half_hybrid.kind = ChannelKind::Hybrid;
    assert!(matches!(
        half_hybrid.validate(),
        Err(LongwireError::ConfigInvalid(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_returns_before_the_first_connect() {
    let registry = ConnectionRegistry::new();

    // endpoint actively refuses; open must still return immediately
    let config = fast_duplex(refused_endpoint().await);
    let started = Instant::now();
    let handle = registry.open(config).unwrap();
    let elapsed = started.elapsed();

    verbose_println!("open took {:?}", elapsed);
    assert!(
        elapsed < Duration::from_millis(100),
        "open blocked for {:?}",
        elapsed
    );
    assert!(!handle.state().is_usable());

    registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_response_roundtrip() {
    let server = MockWsServer::start().await;
    let registry = ConnectionRegistry::new();

    let handle = registry.open(fast_duplex(server.ws_url())).unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Connected);

    let response = handle
        .request(json!({ "method": "get_balance", "params": [] }))
        .await
        .unwrap();
    assert_eq!(response["result"]["echo"], "get_balance");

    let snapshot = registry.snapshot(handle.id()).unwrap();
    assert_eq!(snapshot.connects, 1);
    assert_eq!(snapshot.requests_sent, 1);
    assert!(handle.last_activity().is_some());

    registry.close(handle.id()).await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert!(matches!(
        registry.get(handle.id()),
        Err(LongwireError::HandleNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_all_resolve_exactly_once_on_close() {
    // server accepts requests but never answers them
    let server = MockWsServer::start_with(MockServerOptions {
        swallow_requests: true,
        ..Default::default()
    })
    .await;
    let registry = Arc::new(ConnectionRegistry::new());

    let mut config = fast_duplex(server.ws_url());
    config.request_timeout = Duration::from_secs(30);
    config.queue_depth = 256;

    let handle = registry.open(config).unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..100 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle
                .request(json!({ "method": "slow_call", "params": [i] }))
                .await
        }));
    }

    // give the writes a moment to reach the wire, then yank the handle
    tokio::time::sleep(Duration::from_millis(200)).await;
    registry.close(handle.id()).await.unwrap();

    let mut resolutions = 0;
    for task in tasks {
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("request leaked: never resolved")
            .unwrap();
        resolutions += 1;
        match result {
            Ok(_) => {}
            Err(LongwireError::Cancelled) => {}
            Err(other) => panic!("unexpected resolution: {:?}", other),
        }
    }
    assert_eq!(resolutions, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_queue_rejects_with_backpressure_while_reconnecting() {
    let registry = Arc::new(ConnectionRegistry::new());

    let mut config = fast_duplex(refused_endpoint().await);
    config.queue_depth = 1;
    // park the channel in a long backoff so queued work stays queued
    config.reconnect.base_delay = Duration::from_secs(30);
    config.reconnect.max_delay = Duration::from_secs(30);

    let handle = registry.open(config).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || handle.state()
            == ConnectionState::Reconnecting)
        .await
    );

    // first request occupies the whole queue
    let queued = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.request(json!({ "method": "a" })).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = handle.request(json!({ "method": "b" })).await.unwrap_err();
    assert!(matches!(err, LongwireError::Backpressure));
    assert!(err.is_retryable());

    // closing resolves the queued request instead of leaking it
    registry.close(handle.id()).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), queued)
        .await
        .expect("queued request leaked")
        .unwrap();
    assert!(matches!(result, Err(LongwireError::Cancelled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_tracks_statuses_and_counts() {
    let server = MockWsServer::start().await;
    let registry = ConnectionRegistry::new();

    let a = registry.open(fast_duplex(server.ws_url())).unwrap();
    let b = registry.open(fast_duplex(server.ws_url())).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(registry.handle_count(), 2);

    a.wait_ready(Duration::from_secs(5)).await.unwrap();
    b.wait_ready(Duration::from_secs(5)).await.unwrap();
    assert_eq!(registry.connected_count(), 2);

    let statuses = registry.statuses();
    assert_eq!(statuses[&a.id()], ConnectionState::Connected);

    registry.close_all().await;
    assert_eq!(registry.handle_count(), 0);
    assert_eq!(registry.connected_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsubscribe_via_registry_stops_delivery() {
    let server = MockWsServer::start_with(MockServerOptions {
        emit_events: Some(("tick".to_string(), Duration::from_millis(20))),
        ..Default::default()
    })
    .await;
    let registry = ConnectionRegistry::new();

    let handle = registry.open(fast_duplex(server.ws_url())).unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    let sub = registry
        .subscribe(handle.id(), EventFilter::kinds(["tick"]))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || sub.try_next().is_some()).await);

    registry.unsubscribe(sub.id()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || sub.is_closed()).await);

    assert!(matches!(
        registry.unsubscribe(sub.id()),
        Err(LongwireError::SubscriptionNotFound(_))
    ));

    registry.close_all().await;
}
