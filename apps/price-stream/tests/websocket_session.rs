//! WebSocket Session Integration Tests
//!
//! Runs the real axum server on an ephemeral port and drives it with a
//! tokio-tungstenite client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use price_stream::{
    AppState, Broadcaster, DataSource, DataSourceError, HealthServerState, KeepaliveConfig,
    PublisherStatus, SharedRegistry, StreamServer, SubscriptionRegistry,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct FixedPrices(HashMap<String, f64>);

impl DataSource for FixedPrices {
    fn next_value(&mut self, channel: &str) -> Result<f64, DataSourceError> {
        self.0
            .get(channel)
            .copied()
            .ok_or_else(|| DataSourceError::UnsupportedChannel(channel.to_string()))
    }
}

struct TestServer {
    url: String,
    registry: SharedRegistry,
    shutdown: CancellationToken,
}

async fn start_server(keepalive: KeepaliveConfig) -> TestServer {
    let registry: SharedRegistry = Arc::new(SubscriptionRegistry::new(
        ["BTC", "ETH", "SOL"].map(String::from),
    ));
    let shutdown = CancellationToken::new();
    let health = Arc::new(HealthServerState::new(
        "test-0.0.1".to_string(),
        Arc::clone(&registry),
        Arc::new(PublisherStatus::new()),
    ));
    let state = AppState::new(
        Arc::clone(&registry),
        keepalive,
        Duration::from_secs(5),
        health,
        shutdown.clone(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(StreamServer::new(0, state).serve(listener));

    TestServer {
        url: format!("ws://{addr}/prices"),
        registry,
        shutdown,
    }
}

async fn connect(server: &TestServer) -> Client {
    let (client, _response) = tokio_tungstenite::connect_async(&server.url).await.unwrap();
    client
}

async fn send(client: &mut Client, text: &str) {
    client.send(Message::Text(text.into())).await.unwrap();
}

/// Next text frame, skipping control frames.
async fn next_text(client: &mut Client) -> String {
    timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a text frame")
}

/// Wait until the server closes the connection.
async fn expect_closed(client: &mut Client) {
    timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("server did not close the connection");
}

async fn wait_for_empty_registry(registry: &SharedRegistry) {
    timeout(WAIT, async {
        while registry.stats().total_subscriptions > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client was not removed from the registry");
}

#[tokio::test]
async fn subscribe_is_acknowledged_with_request_id() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    send(
        &mut client,
        r#"{"method":"SUBSCRIBE","streams":["BTC","ETH"],"id":"42"}"#,
    )
    .await;

    assert_eq!(next_text(&mut client).await, r#"{"result":null,"id":"42"}"#);
    let stats = server.registry.stats();
    assert_eq!(stats.distinct_clients, 1);
    assert_eq!(stats.total_subscriptions, 2);
}

#[tokio::test]
async fn subscribed_client_receives_ticks() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    // Wait for the ack first: a tick published concurrently with SUBSCRIBE
    // may or may not be delivered, and that race is accepted.
    send(&mut client, r#"{"method":"SUBSCRIBE","streams":["BTC"],"id":"1"}"#).await;
    next_text(&mut client).await;

    let mut broadcaster = Broadcaster::new(
        Arc::clone(&server.registry),
        FixedPrices(HashMap::from([
            ("BTC".to_string(), 61_000.0),
            ("ETH".to_string(), 3_010.0),
            ("SOL".to_string(), 150.0),
        ])),
        Duration::from_secs(10),
        server.shutdown.clone(),
    );
    let report = broadcaster.publish_once().await;

    assert_eq!(report.delivered, 1);
    assert_eq!(next_text(&mut client).await, r#"{"s":"BTC","p":61000.0}"#);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    send(
        &mut client,
        r#"{"method":"SUBSCRIBE","streams":["BTC","SOL"],"id":"1"}"#,
    )
    .await;
    next_text(&mut client).await;
    send(&mut client, r#"{"method":"UNSUBSCRIBE","streams":[],"id":"2"}"#).await;
    assert_eq!(next_text(&mut client).await, r#"{"result":null,"id":"2"}"#);

    assert_eq!(server.registry.stats().total_subscriptions, 0);
}

#[tokio::test]
async fn unsubscribe_with_null_streams_is_acknowledged() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    send(
        &mut client,
        r#"{"method":"SUBSCRIBE","streams":["BTC","ETH"],"id":"1"}"#,
    )
    .await;
    next_text(&mut client).await;
    send(&mut client, r#"{"method":"UNSUBSCRIBE","streams":null,"id":"2"}"#).await;

    assert_eq!(next_text(&mut client).await, r#"{"result":null,"id":"2"}"#);
    assert_eq!(server.registry.stats().total_subscriptions, 0);
}

#[tokio::test]
async fn binary_requests_are_accepted() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    client
        .send(Message::Binary(
            br#"{"method":"SUBSCRIBE","streams":["ETH"],"id":"b"}"#.to_vec().into(),
        ))
        .await
        .unwrap();

    assert_eq!(next_text(&mut client).await, r#"{"result":null,"id":"b"}"#);
}

#[tokio::test]
async fn malformed_request_closes_connection() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    send(&mut client, r#"{"method":"SUBSCRIBE","streams":["BTC"],"id":"1"}"#).await;
    next_text(&mut client).await;
    send(&mut client, "not json").await;

    expect_closed(&mut client).await;
    wait_for_empty_registry(&server.registry).await;
}

#[tokio::test]
async fn unsupported_method_closes_connection() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    send(&mut client, r#"{"method":"LIST","streams":[],"id":"1"}"#).await;

    expect_closed(&mut client).await;
}

#[tokio::test]
async fn unknown_channel_closes_connection_and_cleans_up() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    send(
        &mut client,
        r#"{"method":"SUBSCRIBE","streams":["BTC","DOGE"],"id":"1"}"#,
    )
    .await;

    expect_closed(&mut client).await;
    wait_for_empty_registry(&server.registry).await;
}

#[tokio::test]
async fn client_disconnect_removes_subscriptions() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    send(
        &mut client,
        r#"{"method":"SUBSCRIBE","streams":["BTC","ETH","SOL"],"id":"1"}"#,
    )
    .await;
    next_text(&mut client).await;
    assert_eq!(server.registry.stats().total_subscriptions, 3);

    client.close(None).await.unwrap();
    wait_for_empty_registry(&server.registry).await;
}

#[tokio::test]
async fn server_pings_idle_clients() {
    let server = start_server(KeepaliveConfig::new(
        Duration::from_millis(100),
        Duration::from_secs(1),
    ))
    .await;
    let mut client = connect(&server).await;

    let ping = timeout(WAIT, async {
        loop {
            if let Some(Ok(Message::Ping(_))) = client.next().await {
                return;
            }
        }
    })
    .await;
    assert!(ping.is_ok(), "expected a ping from the server");
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let server = start_server(KeepaliveConfig::default()).await;
    let mut client = connect(&server).await;

    send(&mut client, r#"{"method":"SUBSCRIBE","streams":["BTC"],"id":"1"}"#).await;
    next_text(&mut client).await;

    server.shutdown.cancel();

    expect_closed(&mut client).await;
    wait_for_empty_registry(&server.registry).await;
}

#[tokio::test]
async fn health_routes_are_served() {
    let server = start_server(KeepaliveConfig::default()).await;
    let addr = server
        .url
        .trim_start_matches("ws://")
        .trim_end_matches("/prices")
        .to_string();

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut stream,
        format!("GET /healthz HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n").as_bytes(),
    )
    .await
    .unwrap();
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("OK"));
}
