//! WebSocket Sink
//!
//! `ClientSink` adapter over the write half of an axum WebSocket. All writes
//! to one connection go through a single mutex, so a tick from the
//! broadcaster, an acknowledgement from the command loop and a ping from the
//! keepalive loop never interleave on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ClientSink, TransportError};
use crate::application::services::InboundFrame;

/// Write half of a client WebSocket.
pub struct WebSocketSink {
    writer: Mutex<SplitSink<WebSocket, Message>>,
    write_timeout: Duration,
    closed: AtomicBool,
    close_signal: CancellationToken,
}

impl WebSocketSink {
    /// Wrap the write half of a socket.
    #[must_use]
    pub fn new(writer: SplitSink<WebSocket, Message>, write_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(writer),
            write_timeout,
            closed: AtomicBool::new(false),
            close_signal: CancellationToken::new(),
        }
    }

    /// Token cancelled as soon as `close` is first called.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.close_signal.clone()
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut writer = self.writer.lock().await;
        writer
            .send(message)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}

#[async_trait]
impl ClientSink for WebSocketSink {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        tokio::time::timeout(self.write_timeout, self.send(Message::Text(text.into())))
            .await
            .unwrap_or(Err(TransportError::Timeout(self.write_timeout)))
    }

    async fn send_ping(&self) -> Result<(), TransportError> {
        self.send(Message::Ping(Bytes::new())).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_signal.cancel();

        let mut writer = self.writer.lock().await;
        let result = tokio::time::timeout(self.write_timeout, async {
            writer.send(Message::Close(None)).await?;
            writer.close().await
        })
        .await;

        if let Ok(Err(e)) = result {
            tracing::debug!(error = %e, "Error while closing client connection");
        }
    }
}

impl From<Message> for InboundFrame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Text(text.to_string()),
            Message::Binary(bytes) => Self::Binary(bytes.to_vec()),
            Message::Ping(_) => Self::Ping,
            Message::Pong(_) => Self::Pong,
            Message::Close(_) => Self::Close,
        }
    }
}

/// Adapt the read half of a socket into the session's inbound stream.
pub fn inbound_frames(
    reader: SplitStream<WebSocket>,
) -> impl Stream<Item = Result<InboundFrame, TransportError>> + Unpin + Send {
    reader.map(|item| {
        item.map(InboundFrame::from)
            .map_err(|e| TransportError::Read(e.to_string()))
    })
}
