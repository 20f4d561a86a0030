//! End-to-end tests for the push-channel gateway.
//!
//! The first group drives the gateway through its `ConnectionHandler` hooks;
//! the last test runs the whole binary wiring behind a real WebSocket.

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use quotegate::app::App;
use quotegate::domain::{ClientId, Symbol};
use quotegate::error::{Error, ValidationError};
use quotegate::infrastructure::config::Config;
use quotegate::port::{ConnectionHandler, PushMessage};
use quotegate::testkit::provider::ProviderScript;
use quotegate::testkit::sink::RecordingSink;

use support::{eventually, Harness};

const SUBSCRIBE_AAPL: &str = r#"{"action":"subscribe","symbols":["AAPL"]}"#;

#[tokio::test]
async fn shared_symbol_is_subscribed_upstream_once() {
    let h = Harness::new(3);
    let (alice, bob) = (ClientId::new("alice"), ClientId::new("bob"));
    h.gateway.on_connect(alice.clone(), Arc::new(RecordingSink::new())).await;
    h.gateway.on_connect(bob.clone(), Arc::new(RecordingSink::new())).await;

    let first = h.gateway.on_message(&alice, SUBSCRIBE_AAPL).await.unwrap();
    let second = h.gateway.on_message(&bob, SUBSCRIBE_AAPL).await.unwrap();

    assert_eq!(first, vec![Symbol::new("AAPL")]);
    assert!(second.is_empty());
    assert_eq!(h.script.subscribe_count("AAPL"), 1);

    h.gateway.on_close(&alice).await;
    assert!(h.script.unsubscribe_calls().is_empty());

    let released = h
        .gateway
        .on_message(&bob, r#"{"action":"unsubscribe","symbols":["AAPL"]}"#)
        .await
        .unwrap();
    assert_eq!(released, vec![Symbol::new("AAPL")]);
    assert_eq!(h.script.unsubscribe_calls(), vec!["AAPL".to_string()]);
}

#[tokio::test]
async fn updates_reach_only_subscribers_under_canonical_symbol() {
    let mut h = Harness::new(3);
    let _pump = h.start_pump();
    let (alice, bob) = (ClientId::new("alice"), ClientId::new("bob"));
    let alice_sink = Arc::new(RecordingSink::new());
    let bob_sink = Arc::new(RecordingSink::new());
    h.gateway.on_connect(alice.clone(), alice_sink.clone()).await;
    h.gateway.on_connect(bob.clone(), bob_sink.clone()).await;

    h.gateway
        .on_message(&alice, r#"{"action":"subscribe","symbols":["tencent"]}"#)
        .await
        .unwrap();
    h.gateway.on_message(&bob, SUBSCRIBE_AAPL).await.unwrap();
    assert_eq!(h.script.subscribe_count("0700.HK"), 1);

    h.script.push("0700.HK", json!({ "price": 320.0 }));

    assert!(eventually(Duration::from_secs(1), || alice_sink.len() == 1).await);
    let pushed = &alice_sink.messages()[0];
    assert_eq!(pushed.symbol, Symbol::new("TENCENT"));
    assert_eq!(pushed.data["price"], 320.0);
    assert!(bob_sink.is_empty());
}

#[tokio::test]
async fn slow_client_does_not_stall_the_rest() {
    let h = Harness::new(3);
    let fast = Arc::new(RecordingSink::new());
    let broken = Arc::new(RecordingSink::failing("socket reset"));
    h.gateway.on_connect(ClientId::new("fast"), fast.clone()).await;
    h.gateway
        .on_connect(ClientId::new("slow"), Arc::new(RecordingSink::slow(Duration::from_millis(500))))
        .await;
    h.gateway.on_connect(ClientId::new("broken"), broken).await;
    for client in ["fast", "slow", "broken"] {
        h.gateway
            .on_message(&ClientId::new(client), SUBSCRIBE_AAPL)
            .await
            .unwrap();
    }

    let report = h
        .broadcaster
        .broadcast(&Symbol::new("AAPL"), json!({ "price": 1.0 }))
        .await;

    assert_eq!(report.targeted, 3);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.timed_out, vec![ClientId::new("slow")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(fast.len(), 1);
}

#[tokio::test]
async fn invalid_requests_are_rejected_without_side_effects() {
    let h = Harness::new(3);
    let client = ClientId::new("alice");

    let err = h
        .gateway
        .on_message(&client, r#"{"action":"subscribe","symbols":["A B"]}"#)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidSymbol { .. })
    ));

    let err = h
        .gateway
        .on_message(&client, r#"{"symbols":["AAPL"]}"#)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::MissingField { field: "action" })
    ));

    assert_eq!(h.subscriptions.client_count(), 0);
    assert!(h.script.subscribe_calls().is_empty());
}

// ---------------------------------------------------------------------------
// Full wiring behind a WebSocket
// ---------------------------------------------------------------------------

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap()
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn websocket_client_receives_snapshot_and_stream_updates() {
    let port = free_port();
    let mut config = Config::default();
    config.server.bind = format!("127.0.0.1:{port}");
    config.server.shutdown_timeout_ms = 500;
    config.upstream.provider = "alpha".into();

    let script = ProviderScript::new();
    let app = App::build_with(config, script.factory()).unwrap();
    let (shutdown, rx) = watch::channel(false);
    let running = tokio::spawn(app.run(rx));

    let mut ws = None;
    for _ in 0..50 {
        if let Ok((stream, _)) = connect_async(format!("ws://127.0.0.1:{port}")).await {
            ws = Some(stream);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let mut ws = ws.expect("server accepts connections");

    ws.send(Message::Text(SUBSCRIBE_AAPL.into())).await.unwrap();
    let snapshot: PushMessage = serde_json::from_value(next_json(&mut ws).await).unwrap();
    assert_eq!(snapshot.symbol, Symbol::new("AAPL"));
    assert_eq!(snapshot.data["price"], 100.0);

    script.push("AAPL", json!({ "price": 101.5 }));
    let update: PushMessage = serde_json::from_value(next_json(&mut ws).await).unwrap();
    assert_eq!(update.data["price"], 101.5);

    ws.send(Message::Text("{oops".into())).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["retryable"], false);
    assert!(error["error"].as_str().unwrap().contains("malformed"));

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
