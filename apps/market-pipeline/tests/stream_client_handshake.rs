//! Stream Client Integration Tests
//!
//! Runs the WebSocket client against a local feed server that speaks the
//! auth/subscribe handshake.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use market_pipeline::infrastructure::alpaca::{
    ConnectionState, Credentials, FeedState, HeartbeatConfig, StreamClient, StreamClientConfig,
};
use market_pipeline::{BackoffConfig, MarketEvent, Timeframe};

const TRADE_AND_BAR: &str = r#"[
    {"T":"t","S":"AAPL","i":7,"x":"V","p":150.25,"s":100,"t":"2024-01-02T14:30:00.123456789Z","c":["@"],"z":"C"},
    {"T":"q","S":"AAPL","bp":150.2,"ap":150.3},
    {"T":"b","S":"MSFT","o":410,"h":412,"l":409.5,"c":411.25,"v":5000,"n":42,"vw":410.9,"t":"2024-01-02T14:30:00Z"}
]"#;

type ServerSocket = WebSocketStream<TcpStream>;

struct Harness {
    url: String,
    listener: TcpListener,
}

impl Harness {
    async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        Self { url, listener }
    }

    async fn accept(&self) -> ServerSocket {
        let (stream, _) = timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }
}

fn client_for(
    url: &str,
) -> (
    Arc<StreamClient>,
    mpsc::Receiver<MarketEvent>,
    Arc<FeedState>,
    CancellationToken,
) {
    let config = StreamClientConfig {
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..BackoffConfig::default()
        },
        heartbeat: HeartbeatConfig {
            ping_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(60),
        },
        handshake_timeout: Duration::from_secs(2),
        ..StreamClientConfig::new(
            url,
            Credentials::new("test-key", "test-secret").unwrap(),
            vec!["AAPL".to_string(), "MSFT".to_string()],
        )
    };
    let (tx, rx) = mpsc::channel(16);
    let state = Arc::new(FeedState::new());
    let cancel = CancellationToken::new();
    let client = Arc::new(StreamClient::new(
        config,
        tx,
        Arc::clone(&state),
        cancel.clone(),
    ));
    (client, rx, state, cancel)
}

async fn send(ws: &mut ServerSocket, frame: &str) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

async fn next_json(ws: &mut ServerSocket) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame from client")
            .expect("client closed the socket")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Drive the server side of the handshake; returns the auth and subscribe frames.
async fn handshake(ws: &mut ServerSocket) -> (Value, Value) {
    send(ws, r#"[{"T":"success","msg":"connected"}]"#).await;
    let auth = next_json(ws).await;
    send(ws, r#"[{"T":"success","msg":"authenticated"}]"#).await;
    let subscribe = next_json(ws).await;
    send(
        ws,
        r#"[{"T":"subscription","trades":["AAPL","MSFT"],"quotes":[],"bars":["AAPL","MSFT"],"updatedBars":["AAPL","MSFT"],"dailyBars":[]}]"#,
    )
    .await;
    (auth, subscribe)
}

async fn recv_event(rx: &mut mpsc::Receiver<MarketEvent>) -> MarketEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event dispatched")
        .expect("event channel closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn handshake_then_dispatch() {
    let harness = Harness::bind().await;
    let (client, mut rx, state, cancel) = client_for(&harness.url);
    let client_task = tokio::spawn(client.run());

    let mut ws = harness.accept().await;
    let (auth, subscribe) = handshake(&mut ws).await;

    assert_eq!(auth["action"], "auth");
    assert_eq!(auth["key"], "test-key");
    assert_eq!(auth["secret"], "test-secret");
    assert_eq!(subscribe["action"], "subscribe");
    assert_eq!(subscribe["trades"], serde_json::json!(["AAPL", "MSFT"]));
    assert_eq!(subscribe["bars"], serde_json::json!(["AAPL", "MSFT"]));
    assert_eq!(subscribe["updatedBars"], serde_json::json!(["AAPL", "MSFT"]));

    send(&mut ws, TRADE_AND_BAR).await;

    let MarketEvent::Trade(trade) = recv_event(&mut rx).await else {
        panic!("expected a trade first");
    };
    assert_eq!(trade.symbol.as_str(), "AAPL");
    assert_eq!(trade.price, dec!(150.25));
    assert_eq!(trade.size, dec!(100));
    assert_eq!(trade.timestamp.as_nanos() % 1_000_000_000, 123_456_789);

    let MarketEvent::Bar(bar) = recv_event(&mut rx).await else {
        panic!("expected a bar second");
    };
    assert_eq!(bar.symbol.as_str(), "MSFT");
    assert_eq!(bar.timeframe, Timeframe::Minute);
    assert_eq!(bar.close, dec!(411.25));
    assert_eq!(bar.vwap, Some(dec!(410.9)));

    assert_eq!(state.state(), ConnectionState::Dispatching);
    wait_until(|| state.events_forwarded() == 2).await;

    cancel.cancel();
    let result = timeout(Duration::from_secs(5), client_task).await.unwrap();
    assert!(result.unwrap().is_ok());
    assert_eq!(state.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn data_before_subscription_is_ignored() {
    let harness = Harness::bind().await;
    let (client, mut rx, _state, cancel) = client_for(&harness.url);
    let client_task = tokio::spawn(client.run());

    let mut ws = harness.accept().await;
    send(&mut ws, r#"[{"T":"success","msg":"connected"}]"#).await;
    let _auth = next_json(&mut ws).await;
    send(&mut ws, TRADE_AND_BAR).await;
    send(&mut ws, r#"[{"T":"success","msg":"authenticated"}]"#).await;
    let _subscribe = next_json(&mut ws).await;

    assert!(rx.try_recv().is_err());

    cancel.cancel();
    let _ = timeout(Duration::from_secs(5), client_task).await.unwrap();
}

#[tokio::test]
async fn reconnects_after_server_drop() {
    let harness = Harness::bind().await;
    let (client, mut rx, state, cancel) = client_for(&harness.url);
    let client_task = tokio::spawn(client.run());

    let mut first = harness.accept().await;
    handshake(&mut first).await;
    wait_until(|| state.state() == ConnectionState::Dispatching).await;
    drop(first);

    let mut second = harness.accept().await;
    let (auth, _) = handshake(&mut second).await;
    assert_eq!(auth["action"], "auth");

    send(&mut second, TRADE_AND_BAR).await;
    assert!(matches!(recv_event(&mut rx).await, MarketEvent::Trade(_)));

    wait_until(|| state.state() == ConnectionState::Dispatching).await;
    assert_eq!(state.reconnect_attempts(), 0);
    assert!(state.last_error().is_none());

    cancel.cancel();
    let _ = timeout(Duration::from_secs(5), client_task).await.unwrap();
}

#[tokio::test]
async fn rejected_credentials_retry_with_backoff() {
    let harness = Harness::bind().await;
    let (client, _rx, state, cancel) = client_for(&harness.url);
    let client_task = tokio::spawn(client.run());

    let mut first = harness.accept().await;
    let _auth = next_json(&mut first).await;
    send(&mut first, r#"[{"T":"error","code":402,"msg":"auth failed"}]"#).await;

    wait_until(|| state.reconnect_attempts() >= 1).await;
    assert!(state.last_error().is_some_and(|e| e.contains("authentication failed")));

    // The client comes back for another attempt.
    let mut second = harness.accept().await;
    let auth = next_json(&mut second).await;
    assert_eq!(auth["action"], "auth");

    cancel.cancel();
    let _ = timeout(Duration::from_secs(5), client_task).await.unwrap();
}
