//! Connection Session
//!
//! Owns one client connection for its whole lifetime. A session runs two
//! loops:
//!
//! - the command loop, which reads SUBSCRIBE/UNSUBSCRIBE requests and applies
//!   them to the registry, and
//! - the keepalive loop ([`Pinger`]), which pings the client on a fixed
//!   interval.
//!
//! Both loops share a `CancellationToken`. Whichever loop ends first tears the
//! session down: the client is removed from the registry (idempotent), the
//! token is cancelled, the write path is closed and the other loop is awaited.
//! The command loop also stops when the sink reports that its write path was
//! closed from outside, so a client dropped by the broadcaster is disconnected.
//!
//! There is no ordering between a SUBSCRIBE acknowledgement and the first tick
//! for that channel: a tick published concurrently with the subscribe may or
//! may not reach the client.

use std::fmt;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::keepalive::{KeepaliveConfig, Pinger, PongTracker};
use crate::application::ports::{SharedRegistry, SharedSink, TransportError};
use crate::domain::streaming::ClientId;
use crate::domain::subscription::RegistryError;
use crate::infrastructure::metrics;
use crate::infrastructure::websocket::codec::{self, CodecError};
use crate::infrastructure::websocket::messages::{Method, SubscriptionRequest, SubscriptionResult};

// =============================================================================
// Types
// =============================================================================

/// A frame received from the client, independent of the transport library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Transport-level ping (answered by the transport).
    Ping,
    /// Transport-level pong.
    Pong,
    /// Close frame from the peer.
    Close,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Serving requests and receiving broadcasts.
    Active,
    /// Teardown in progress.
    Closing,
    /// Both loops have exited and the client is out of the registry.
    Closed,
}

impl SessionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client referenced a channel that is not configured.
    #[error(transparent)]
    UnknownChannel(#[from] RegistryError),

    /// The payload could not be decoded as a request.
    #[error("malformed request: {0}")]
    MalformedRequest(#[from] CodecError),

    /// The request used a method other than SUBSCRIBE/UNSUBSCRIBE.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Writing a response failed.
    #[error("transport write failure: {0}")]
    TransportWrite(TransportError),

    /// Reading from the connection failed.
    #[error("transport read failure: {0}")]
    TransportRead(TransportError),

    /// A keepalive ping could not be delivered.
    #[error("keepalive failure: {0}")]
    Keepalive(TransportError),
}

impl SessionError {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownChannel(_) => "unknown_channel",
            Self::MalformedRequest(_) => "malformed_request",
            Self::UnsupportedMethod(_) => "unsupported_method",
            Self::TransportWrite(_) => "transport_write",
            Self::TransportRead(_) => "transport_read",
            Self::Keepalive(_) => "keepalive",
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed the connection.
    PeerClosed,
    /// The process is shutting down.
    Shutdown,
    /// The write path was closed from outside the session, e.g. after a
    /// failed broadcast push.
    Evicted,
    /// A protocol or transport error ended the session.
    Failed(SessionError),
}

impl SessionEnd {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::Shutdown => "shutdown",
            Self::Evicted => "evicted",
            Self::Failed(e) => e.kind(),
        }
    }
}

// =============================================================================
// Connection Session
// =============================================================================

/// Runtime state of one client connection.
pub struct ConnectionSession {
    client: ClientId,
    sink: SharedSink,
    registry: SharedRegistry,
    keepalive: KeepaliveConfig,
    state: Arc<RwLock<SessionState>>,
    pongs: Arc<PongTracker>,
    cancel: CancellationToken,
    sink_closed: CancellationToken,
}

impl ConnectionSession {
    /// Create a session for a freshly accepted connection.
    ///
    /// The session's cancellation token is a child of `shutdown`, so process
    /// shutdown ends every session.
    #[must_use]
    pub fn new(
        client: ClientId,
        sink: SharedSink,
        registry: SharedRegistry,
        keepalive: KeepaliveConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            client,
            sink,
            registry,
            keepalive,
            state: Arc::new(RwLock::new(SessionState::Active)),
            pongs: Arc::new(PongTracker::new()),
            cancel: shutdown.child_token(),
            sink_closed: CancellationToken::new(),
        }
    }

    /// End the session once `signal` is cancelled. The sink adapter cancels
    /// it when its write path is closed by someone else, such as the
    /// broadcaster dropping a client whose push failed.
    #[must_use]
    pub fn with_close_signal(mut self, signal: CancellationToken) -> Self {
        self.sink_closed = signal;
        self
    }

    /// The client this session serves.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        self.client
    }

    /// Shared view of the session state, readable after `run` consumed the
    /// session.
    #[must_use]
    pub fn state_handle(&self) -> Arc<RwLock<SessionState>> {
        Arc::clone(&self.state)
    }

    /// Run both loops until the connection ends.
    pub async fn run<S>(self, mut inbound: S) -> SessionEnd
    where
        S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin + Send,
    {
        tracing::info!(client_id = %self.client, "Client session started");

        let pinger = Pinger::new(
            self.client,
            self.keepalive,
            Arc::clone(&self.sink),
            Arc::clone(&self.pongs),
            self.cancel.clone(),
        );
        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.clone();
        let client = self.client;
        let pinger_handle = tokio::spawn(async move {
            let result = pinger.run().await;
            if let Err(e) = &result {
                tracing::error!(
                    client_id = %client,
                    error = %e,
                    "Failed to send ping, removing client subscriptions"
                );
                registry.remove_client(client);
                cancel.cancel();
            }
            result
        });

        let mut end = self.command_loop(&mut inbound).await;

        self.set_state(SessionState::Closing);
        self.registry.remove_client(self.client);
        self.cancel.cancel();
        self.sink.close().await;

        match pinger_handle.await {
            Ok(Err(e)) if matches!(end, SessionEnd::Shutdown) => {
                // The pinger cancelled the command loop
                end = SessionEnd::Failed(SessionError::Keepalive(e));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(client_id = %self.client, error = %e, "Pinger task failed");
            }
        }

        self.set_state(SessionState::Closed);
        metrics::record_session_closed(end.kind());

        match &end {
            SessionEnd::Failed(e) => {
                tracing::warn!(client_id = %self.client, error = %e, "Client session closed");
            }
            SessionEnd::PeerClosed | SessionEnd::Shutdown | SessionEnd::Evicted => {
                tracing::info!(
                    client_id = %self.client,
                    reason = end.kind(),
                    "Client session closed"
                );
            }
        }

        end
    }

    async fn command_loop<S>(&self, inbound: &mut S) -> SessionEnd
    where
        S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin + Send,
    {
        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => return SessionEnd::Shutdown,
                () = self.sink_closed.cancelled() => {
                    tracing::info!(
                        client_id = %self.client,
                        "Write path was closed, ending session"
                    );
                    return SessionEnd::Evicted;
                }
                frame = inbound.next() => frame,
            };

            let payload = match frame {
                Some(Ok(InboundFrame::Text(text))) => text.into_bytes(),
                Some(Ok(InboundFrame::Binary(bytes))) => bytes,
                Some(Ok(InboundFrame::Ping)) => continue,
                Some(Ok(InboundFrame::Pong)) => {
                    tracing::debug!(client_id = %self.client, "Received pong from client");
                    self.pongs.record_pong();
                    continue;
                }
                Some(Ok(InboundFrame::Close)) | None => {
                    tracing::info!(
                        client_id = %self.client,
                        "Connection was closed by the client, removing from the subscription list"
                    );
                    return SessionEnd::PeerClosed;
                }
                Some(Err(e)) => {
                    tracing::error!(
                        client_id = %self.client,
                        error = %e,
                        "Error while reading a message, closing connection"
                    );
                    return SessionEnd::Failed(SessionError::TransportRead(e));
                }
            };

            if let Err(e) = self.handle_request(&payload).await {
                return SessionEnd::Failed(e);
            }
        }
    }

    async fn handle_request(&self, payload: &[u8]) -> Result<(), SessionError> {
        let request: SubscriptionRequest = codec::decode_request(payload)?;

        tracing::debug!(
            client_id = %self.client,
            method = %request.method,
            streams = ?request.streams,
            "Got message from client"
        );

        let method = request
            .method
            .parse::<Method>()
            .map_err(|_| SessionError::UnsupportedMethod(request.method.clone()))?;
        metrics::record_request(method);

        match method {
            Method::Subscribe => {
                self.registry.add_subscriptions(
                    self.client,
                    Arc::clone(&self.sink),
                    &request.streams,
                )?;
            }
            Method::Unsubscribe => {
                self.registry
                    .remove_subscriptions(self.client, &request.streams)?;
            }
        }

        let ack = codec::encode_result(&SubscriptionResult::ok(request.id))?;
        self.sink
            .send_text(ack)
            .await
            .map_err(SessionError::TransportWrite)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;
    use crate::application::ports::{ClientSink, MockClientSink};
    use crate::domain::subscription::SubscriptionRegistry;

    /// Sink that records every text frame.
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
        closed: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl ClientSink for RecordingSink {
        async fn send_text(&self, text: String) -> Result<(), TransportError> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn send_ping(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    type Inbound = mpsc::UnboundedSender<Result<InboundFrame, TransportError>>;

    fn registry() -> SharedRegistry {
        Arc::new(SubscriptionRegistry::new(
            ["BTC", "ETH", "SOL"].map(String::from),
        ))
    }

    fn start(
        sink: SharedSink,
        registry: &SharedRegistry,
        keepalive: KeepaliveConfig,
    ) -> (
        ClientId,
        Inbound,
        Arc<RwLock<SessionState>>,
        tokio::task::JoinHandle<SessionEnd>,
    ) {
        let shutdown = CancellationToken::new();
        let session = ConnectionSession::new(
            ClientId::new(),
            sink,
            Arc::clone(registry),
            keepalive,
            &shutdown,
        );
        let client = session.client_id();
        let state = session.state_handle();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(session.run(UnboundedReceiverStream::new(rx)));
        (client, tx, state, handle)
    }

    fn text(json: &str) -> Result<InboundFrame, TransportError> {
        Ok(InboundFrame::Text(json.to_string()))
    }

    async fn wait_for_acks(sink: &RecordingSink, count: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while sink.sent.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("acks should arrive");
    }

    #[tokio::test]
    async fn subscribe_registers_and_acks_with_request_id() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let (client, tx, state, handle) =
            start(sink.clone(), &registry, KeepaliveConfig::default());

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["BTC","ETH"],"id":"42"}"#))
            .unwrap();
        wait_for_acks(&sink, 1).await;

        assert_eq!(sink.sent.lock()[0], r#"{"result":null,"id":"42"}"#);
        assert_eq!(registry.client_channels(client), vec!["BTC", "ETH"]);
        assert_eq!(*state.read(), SessionState::Active);

        drop(tx);
        let end = handle.await.unwrap();
        assert!(matches!(end, SessionEnd::PeerClosed));
    }

    #[tokio::test]
    async fn unsubscribe_removes_listed_channels_and_acks() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let (client, tx, _state, handle) =
            start(sink.clone(), &registry, KeepaliveConfig::default());

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["BTC","ETH","SOL"],"id":"1"}"#))
            .unwrap();
        tx.send(text(r#"{"method":"UNSUBSCRIBE","streams":["ETH"],"id":"2"}"#))
            .unwrap();
        wait_for_acks(&sink, 2).await;

        assert_eq!(sink.sent.lock()[1], r#"{"result":null,"id":"2"}"#);
        assert_eq!(registry.client_channels(client), vec!["BTC", "SOL"]);

        tx.send(Ok(InboundFrame::Close)).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_without_streams_removes_everything() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let (client, tx, _state, handle) =
            start(sink.clone(), &registry, KeepaliveConfig::default());

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["BTC","SOL"],"id":"1"}"#))
            .unwrap();
        tx.send(text(r#"{"method":"UNSUBSCRIBE","id":"2"}"#)).unwrap();
        wait_for_acks(&sink, 2).await;

        assert!(registry.client_channels(client).is_empty());

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_with_null_streams_removes_everything() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let (client, tx, _state, handle) =
            start(sink.clone(), &registry, KeepaliveConfig::default());

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["BTC","ETH"],"id":"1"}"#))
            .unwrap();
        tx.send(text(r#"{"method":"UNSUBSCRIBE","streams":null,"id":"2"}"#))
            .unwrap();
        wait_for_acks(&sink, 2).await;

        assert_eq!(sink.sent.lock()[1], r#"{"result":null,"id":"2"}"#);
        assert!(registry.client_channels(client).is_empty());

        drop(tx);
        let end = handle.await.unwrap();
        assert!(matches!(end, SessionEnd::PeerClosed));
    }

    #[tokio::test]
    async fn binary_requests_are_accepted() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let (client, tx, _state, handle) =
            start(sink.clone(), &registry, KeepaliveConfig::default());

        tx.send(Ok(InboundFrame::Binary(
            br#"{"method":"SUBSCRIBE","streams":["SOL"],"id":"b"}"#.to_vec(),
        )))
        .unwrap();
        wait_for_acks(&sink, 1).await;

        assert!(registry.is_subscribed(client, "SOL"));

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_request_closes_and_cleans_up() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let (client, tx, state, handle) =
            start(sink.clone(), &registry, KeepaliveConfig::default());

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["BTC"],"id":"1"}"#))
            .unwrap();
        tx.send(text("not json")).unwrap();

        let end = handle.await.unwrap();

        assert!(matches!(
            end,
            SessionEnd::Failed(SessionError::MalformedRequest(_))
        ));
        assert!(registry.client_channels(client).is_empty());
        assert!(*sink.closed.lock());
        assert_eq!(*state.read(), SessionState::Closed);
    }

    #[tokio::test]
    async fn unsupported_method_closes_connection() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let (client, tx, _state, handle) =
            start(sink.clone(), &registry, KeepaliveConfig::default());

        tx.send(text(r#"{"method":"LIST_SUBSCRIPTIONS","id":"1"}"#))
            .unwrap();

        let end = handle.await.unwrap();

        match end {
            SessionEnd::Failed(SessionError::UnsupportedMethod(method)) => {
                assert_eq!(method, "LIST_SUBSCRIPTIONS");
            }
            other => panic!("unexpected end: {other:?}"),
        }
        assert!(sink.sent.lock().is_empty());
        assert!(registry.client_channels(client).is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_closes_and_drops_partial_subscriptions() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let (client, tx, _state, handle) =
            start(sink.clone(), &registry, KeepaliveConfig::default());

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["BTC","DOGE"],"id":"1"}"#))
            .unwrap();

        let end = handle.await.unwrap();

        assert!(matches!(
            end,
            SessionEnd::Failed(SessionError::UnknownChannel(_))
        ));
        assert!(sink.sent.lock().is_empty());
        assert!(registry.client_channels(client).is_empty());
    }

    #[tokio::test]
    async fn read_failure_removes_client() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let (client, tx, _state, handle) =
            start(sink.clone(), &registry, KeepaliveConfig::default());

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["ETH"],"id":"1"}"#))
            .unwrap();
        wait_for_acks(&sink, 1).await;
        tx.send(Err(TransportError::Read("connection reset".to_string())))
            .unwrap();

        let end = handle.await.unwrap();

        assert!(matches!(
            end,
            SessionEnd::Failed(SessionError::TransportRead(_))
        ));
        assert!(registry.client_channels(client).is_empty());
    }

    #[tokio::test]
    async fn failed_ack_write_closes_session() {
        let registry = registry();
        let mut sink = MockClientSink::new();
        sink.expect_send_text()
            .returning(|_| Err(TransportError::Write("broken pipe".to_string())));
        sink.expect_close().return_const(());
        let (client, tx, _state, handle) =
            start(Arc::new(sink), &registry, KeepaliveConfig::default());

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["BTC"],"id":"1"}"#))
            .unwrap();

        let end = handle.await.unwrap();

        assert!(matches!(
            end,
            SessionEnd::Failed(SessionError::TransportWrite(_))
        ));
        assert!(registry.client_channels(client).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ping_ends_silent_session() {
        let registry = registry();
        let mut sink = MockClientSink::new();
        sink.expect_send_text().returning(|_| Ok(()));
        sink.expect_send_ping()
            .returning(|| Err(TransportError::Write("broken pipe".to_string())));
        sink.expect_close().return_const(());
        let keepalive = KeepaliveConfig::new(Duration::from_secs(60), Duration::from_secs(120));
        let (client, tx, state, handle) = start(Arc::new(sink), &registry, keepalive);

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["BTC"],"id":"1"}"#))
            .unwrap();

        // The client never sends anything else; only the pinger can end the session
        let end = handle.await.unwrap();

        assert!(matches!(end, SessionEnd::Failed(SessionError::Keepalive(_))));
        assert!(registry.client_channels(client).is_empty());
        assert_eq!(*state.read(), SessionState::Closed);
        drop(tx);
    }

    #[tokio::test]
    async fn shutdown_ends_session() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let shutdown = CancellationToken::new();
        let session = ConnectionSession::new(
            ClientId::new(),
            sink.clone(),
            Arc::clone(&registry),
            KeepaliveConfig::default(),
            &shutdown,
        );
        let (_tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(session.run(UnboundedReceiverStream::new(rx)));

        shutdown.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(end, SessionEnd::Shutdown));
        assert!(*sink.closed.lock());
    }

    #[tokio::test]
    async fn closed_write_path_ends_session() {
        let registry = registry();
        let sink = Arc::new(RecordingSink::default());
        let shutdown = CancellationToken::new();
        let signal = CancellationToken::new();
        let session = ConnectionSession::new(
            ClientId::new(),
            sink.clone(),
            Arc::clone(&registry),
            KeepaliveConfig::default(),
            &shutdown,
        )
        .with_close_signal(signal.clone());
        let client = session.client_id();
        let state = session.state_handle();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(session.run(UnboundedReceiverStream::new(rx)));

        tx.send(text(r#"{"method":"SUBSCRIBE","streams":["BTC"],"id":"1"}"#))
            .unwrap();
        wait_for_acks(&sink, 1).await;

        signal.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(end, SessionEnd::Evicted));
        assert_eq!(end.kind(), "evicted");
        assert!(registry.client_channels(client).is_empty());
        assert_eq!(*state.read(), SessionState::Closed);
        assert!(!shutdown.is_cancelled());
        drop(tx);
    }

    #[test]
    fn session_state_names() {
        assert_eq!(SessionState::Active.to_string(), "active");
        assert_eq!(SessionState::Closing.to_string(), "closing");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
