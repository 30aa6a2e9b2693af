//! Integration tests for reconnection: backoff strategies, the recovery
//! cycle, and retry-budget exhaustion.

mod common;

use common::{refused_endpoint, wait_until, MockServerOptions, MockWsServer};
use longwire::{
    ConnectionConfig, ConnectionRegistry, ConnectionState, EventFilter, EventRecord,
    ExponentialBackoff, FixedDelay, NeverReconnect, QueueSink, ReconnectConfig,
    ReconnectionStrategy,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn exponential_backoff_sequence_is_non_decreasing_and_capped() {
    let strategy = ExponentialBackoff::new(
        Duration::from_millis(100),
        Duration::from_secs(2),
        0.0,
        None,
    );

    let delays: Vec<u64> = (0..8)
        .map(|attempt| strategy.next_delay(attempt).unwrap().as_millis() as u64)
        .collect();
    verbose_println!("delays: {:?}", delays);

    assert_eq!(&delays[..5], &[100, 200, 400, 800, 1600]);
    assert_eq!(delays[5], 2000); // capped
    assert_eq!(delays[6], 2000);
    for pair in delays.windows(2) {
        assert!(pair[0] <= pair[1], "sequence must be non-decreasing");
    }
}

#[test]
fn jittered_delays_stay_inside_the_envelope() {
    let strategy = ExponentialBackoff::new(
        Duration::from_millis(100),
        Duration::from_secs(10),
        0.5,
        None,
    );

    for attempt in 0..6 {
        let raw = strategy.raw_delay(attempt);
        for _ in 0..50 {
            let jittered = strategy.next_delay(attempt).unwrap();
            assert!(
                jittered >= raw.mul_f64(0.5) && jittered <= raw.mul_f64(1.5),
                "attempt {}: {:?} outside ±50% of {:?}",
                attempt,
                jittered,
                raw
            );
        }
    }
}

#[test]
fn backoff_respects_the_attempt_budget() {
    let strategy = ExponentialBackoff::new(
        Duration::from_millis(100),
        Duration::from_secs(10),
        0.0,
        Some(5),
    );

    for attempt in 0..5 {
        assert!(strategy.next_delay(attempt).is_some());
    }
    assert!(strategy.next_delay(5).is_none());
    assert!(!strategy.should_reconnect(5));
}

#[test]
fn backoff_overflow_safety_at_extreme_attempts() {
    let strategy = ExponentialBackoff::new(
        Duration::from_millis(100),
        Duration::from_secs(3600),
        0.0,
        None,
    );

    for attempt in [30, 64, 100, 1000] {
        let delay = strategy.next_delay(attempt).unwrap();
        assert!(delay <= Duration::from_secs(3600));
    }
}

#[test]
fn fixed_delay_is_constant_and_never_reconnect_refuses() {
    let fixed = FixedDelay::new(Duration::from_millis(750), None);
    for attempt in 0..100 {
        assert_eq!(fixed.next_delay(attempt), Some(Duration::from_millis(750)));
    }

    let bounded = FixedDelay::new(Duration::from_millis(500), Some(3));
    assert!(bounded.next_delay(2).is_some());
    assert!(bounded.next_delay(3).is_none());

    let never = NeverReconnect;
    for attempt in 0..10 {
        assert!(never.next_delay(attempt).is_none());
        assert!(!never.should_reconnect(attempt));
    }
}

#[test]
fn strategy_built_from_config_matches_parameters() {
    let strategy = ExponentialBackoff::from_config(&ReconnectConfig {
        base_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(1),
        jitter_ratio: 0.0,
        max_attempts: Some(2),
    });
    assert_eq!(strategy.next_delay(0), Some(Duration::from_millis(200)));
    assert_eq!(strategy.next_delay(1), Some(Duration::from_millis(400)));
    assert!(strategy.next_delay(2).is_none());
}

fn recovering_config(url: String) -> ConnectionConfig {
    let mut config = ConnectionConfig::duplex(url);
    config.heartbeat_interval = Duration::from_secs(5);
    config.heartbeat_timeout = Duration::from_secs(2);
    config.connect_timeout = Duration::from_secs(2);
    config.request_timeout = Duration::from_secs(5);
    config.reconnect.base_delay = Duration::from_millis(50);
    config.reconnect.max_delay = Duration::from_millis(200);
    config.reconnect.jitter_ratio = 0.0;
    config.close_grace = Duration::from_secs(2);
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lost_socket_recovers_and_subscriptions_survive() {
    let server = MockWsServer::start_with(MockServerOptions {
        emit_events: Some(("newHeads".to_string(), Duration::from_millis(20))),
        ..Default::default()
    })
    .await;
    let registry = ConnectionRegistry::new();

    let handle = registry.open(recovering_config(server.ws_url())).unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    let sub = handle.subscribe(EventFilter::kinds(["newHeads"])).unwrap();
    assert!(wait_until(Duration::from_secs(2), || sub.try_next().is_some()).await);

    // drop the socket out from under the channel
    server.kill_connections();
    assert!(
        wait_until(Duration::from_secs(5), || handle.state()
            == ConnectionState::Connected
            && server.accepted_count() >= 2)
        .await,
        "channel did not recover"
    );

    // same subscription, events flowing again
    while sub.try_next().is_some() {}
    assert!(
        wait_until(Duration::from_secs(2), || sub.try_next().is_some()).await,
        "events did not resume after reconnect"
    );

    let snapshot = handle.snapshot();
    verbose_println!("after recovery: {:?}", snapshot);
    assert!(snapshot.reconnects >= 1);
    assert!(snapshot.connects >= 2);

    registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_budget_exhaustion_reaches_failed_after_exact_attempts() {
    let (sink, records) = QueueSink::new(64);
    let registry = ConnectionRegistry::new().with_sink(Arc::new(sink));

    let mut config = recovering_config(refused_endpoint().await);
    config.reconnect.max_attempts = Some(3);

    let handle = registry.open(config).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || handle.state()
            == ConnectionState::Failed)
        .await,
        "handle never reached Failed"
    );

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.connect_attempts, 3);
    assert_eq!(snapshot.connects, 0);

    // no further automatic attempts once terminal
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(handle.snapshot().connect_attempts, 3);
    assert_eq!(handle.state(), ConnectionState::Failed);

    // surfaced exactly once through the sink
    let exhausted: Vec<_> = records
        .try_iter()
        .filter(|record| matches!(record, EventRecord::RetryBudgetExhausted { attempts: 3, .. }))
        .collect();
    assert_eq!(exhausted.len(), 1);

    // requests now fail terminally without touching the network
    let err = handle
        .request(serde_json::json!({ "method": "anything" }))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());

    registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missed_probes_degrade_then_reconnect() {
    let server = MockWsServer::start_with(MockServerOptions {
        silent_probes: true,
        ..Default::default()
    })
    .await;
    let (sink, records) = QueueSink::new(256);
    let registry = ConnectionRegistry::new().with_sink(Arc::new(sink));

    let mut config = recovering_config(server.ws_url());
    config.heartbeat_interval = Duration::from_millis(120);
    config.heartbeat_timeout = Duration::from_millis(60);

    let handle = registry.open(config).unwrap();
    handle.wait_ready(Duration::from_secs(5)).await.unwrap();

    // one miss degrades, the second tears down and reconnects
    let mut seen = Vec::new();
    assert!(
        wait_until(Duration::from_secs(5), || {
            seen.extend(records.try_iter());
            seen.iter().any(|record| {
                matches!(
                    record,
                    EventRecord::StateChanged {
                        to: ConnectionState::Degraded,
                        ..
                    }
                )
            })
        })
        .await,
        "never degraded"
    );
    assert!(
        wait_until(Duration::from_secs(5), || handle
            .snapshot()
            .heartbeat_failures
            >= 2
            && server.accepted_count() >= 2)
        .await,
        "second miss did not force a reconnect"
    );

    registry.close_all().await;
}
