//! Price Stream Test Client
//!
//! Connects to a running server, subscribes to a set of channels, logs every
//! message it receives and unsubscribes after a delay. Ctrl+C closes the
//! connection cleanly.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream-client
//! ```
//!
//! # Environment Variables
//!
//! - `PRICE_STREAM_URL`: Server endpoint (default: ws://localhost:8080/prices)
//! - `PRICE_STREAM_CLIENT_CHANNELS`: Comma-separated channels (default: BTC)
//! - `PRICE_STREAM_CLIENT_UNSUBSCRIBE_AFTER_SECS`: Delay before UNSUBSCRIBE (default: 300)

use std::time::Duration;

use anyhow::{Context, bail};
use futures_util::{SinkExt, StreamExt};
use price_stream::{Channel, Method, SubscriptionRequest};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const DEFAULT_URL: &str = "ws://localhost:8080/prices";
const DEFAULT_CHANNELS: &str = "BTC";
const DEFAULT_UNSUBSCRIBE_AFTER: Duration = Duration::from_secs(300);

/// How long to wait for the server to acknowledge a close.
const CLOSE_WAIT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let url = std::env::var("PRICE_STREAM_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let channels = parse_channels(
        &std::env::var("PRICE_STREAM_CLIENT_CHANNELS")
            .unwrap_or_else(|_| DEFAULT_CHANNELS.to_string()),
    )?;
    let unsubscribe_after = match std::env::var("PRICE_STREAM_CLIENT_UNSUBSCRIBE_AFTER_SECS") {
        Ok(value) => Duration::from_secs(
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid unsubscribe delay: {value}"))?,
        ),
        Err(_) => DEFAULT_UNSUBSCRIBE_AFTER,
    };

    tracing::info!(url = %url, "Connecting");
    let (ws_stream, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = SubscriptionRequest::new(Method::Subscribe, channels.clone(), "1");
    let json = serde_json::to_string(&subscribe)?;
    tracing::info!(request = %json, "Subscribing");
    write.send(Message::Text(json.into())).await?;

    let unsubscribe_timer = tokio::time::sleep(unsubscribe_after);
    tokio::pin!(unsubscribe_timer);
    let mut unsubscribed = false;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::info!(message = %text, "Received");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Server closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("read failed"),
                    None => {
                        tracing::info!("Connection ended");
                        return Ok(());
                    }
                }
            }
            () = &mut unsubscribe_timer, if !unsubscribed => {
                unsubscribed = true;
                let unsubscribe = SubscriptionRequest::new(Method::Unsubscribe, channels.clone(), "2");
                let json = serde_json::to_string(&unsubscribe)?;
                tracing::info!(request = %json, "Unsubscribing");
                write.send(Message::Text(json.into())).await?;
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl+C")?;
                tracing::info!("Interrupted, closing connection");
                write
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    })))
                    .await?;

                // Wait briefly for the server to finish the close handshake
                let _ = tokio::time::timeout(CLOSE_WAIT, async {
                    while let Some(Ok(msg)) = read.next().await {
                        if msg.is_close() {
                            break;
                        }
                    }
                })
                .await;
                return Ok(());
            }
        }
    }
}

fn parse_channels(value: &str) -> anyhow::Result<Vec<Channel>> {
    let channels: Vec<Channel> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();
    if channels.is_empty() {
        bail!("no channels to subscribe to");
    }
    Ok(channels)
}
