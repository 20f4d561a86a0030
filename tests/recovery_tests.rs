//! Integration tests for stream recovery.
//!
//! Simulates provider outages against the full streaming path and checks the
//! recovery contract: bounded reconnect attempts, a single replay per symbol
//! and delivery resuming once the stream is back.

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use quotegate::domain::{ClientId, ConnectionState, Symbol};
use quotegate::error::Error;
use quotegate::port::{ConnectionHandler, EventKind};
use quotegate::testkit::sink::RecordingSink;

use support::{credential, eventually, provider, symbols, Harness};

#[tokio::test]
async fn outage_is_recovered_and_replayed_once_per_symbol() {
    let mut h = Harness::new(5);
    let _pump = h.start_pump();
    let sink = Arc::new(RecordingSink::new());
    let alice = ClientId::new("alice");
    let bob = ClientId::new("bob");

    h.gateway.on_connect(alice.clone(), sink.clone()).await;
    h.gateway
        .on_message(&alice, r#"{"action":"subscribe","symbols":["TENCENT","AAPL"]}"#)
        .await
        .unwrap();
    // AAPL has two subscribers and is still replayed once.
    h.subscriptions.subscribe(&bob, &symbols(&["AAPL"])).await;

    h.degrade_stream().await;
    h.script.clear_calls();
    h.script.fail_next_connects(2);

    let worker = h.recovery.spawn(h.shutdown.subscribe());
    assert!(eventually(Duration::from_secs(3), || h.recovery.stats().recovered == 1).await);

    assert_eq!(h.script.subscribe_count("0700.HK"), 1);
    assert_eq!(h.script.subscribe_count("AAPL"), 1);
    assert_eq!(h.recovery.stats().replays, 1);
    assert!(h.pool.has_live_stream(&provider(), &credential()));

    h.script.push("0700.HK", json!({ "price": 318.2 }));
    assert!(eventually(Duration::from_secs(1), || !sink.is_empty()).await);
    assert_eq!(sink.messages()[0].symbol.as_str(), "TENCENT");

    h.shutdown.send(true).unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn prolonged_outage_gives_up_after_max_retries() {
    let h = Harness::new(3);
    h.subscriptions
        .subscribe(&ClientId::new("alice"), &symbols(&["AAPL"]))
        .await;
    let stream = h.pool.stream_connection(&provider(), &credential()).unwrap();

    h.degrade_stream().await;
    assert_eq!(h.pool.connection_state(stream), Some(ConnectionState::Degraded));
    let connects_before = h.script.connect_count();
    h.script.set_connect_down(true);

    let report = h.recovery.scan(&h.shutdown.subscribe()).await;

    assert_eq!(report.gave_up, 1);
    assert!(h.script.connect_count() - connects_before <= 3);
    assert!(!h.pool.is_provider_available(&provider()));
    assert_eq!(h.events.count(EventKind::ProviderUnavailable), 1);
    assert_eq!(h.events.count(EventKind::CriticalBroadcastFailure), 1);

    // Requests fail fast while the provider is marked unavailable.
    let err = h.pool.acquire(&provider(), &credential(), None).await.unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn subscriptions_made_during_outage_are_armed_later() {
    let h = Harness::new(3);
    h.script.set_subscribe_down(true);

    h.subscriptions
        .subscribe(&ClientId::new("alice"), &symbols(&["MSFT"]))
        .await;
    assert_eq!(h.subscriptions.ref_count(&Symbol::new("MSFT")), 1);
    assert!(h.script.subscribe_calls().is_empty());

    h.script.set_subscribe_down(false);
    h.degrade_stream().await;
    let report = h.recovery.scan(&h.shutdown.subscribe()).await;

    assert_eq!(report.recovered, 1);
    assert_eq!(h.script.subscribe_count("MSFT"), 1);
}
