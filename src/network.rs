//! Network client for the OneBot forward WebSocket event stream
//!
//! This module handles connecting to the event endpoint, parsing frames into
//! [`InboundEvent`]s, and managing reconnection logic.

use crate::core::InboundEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::{header::AUTHORIZATION, HeaderValue},
    Message,
};
use tracing::{debug, error, info, trace, warn};

const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 60_000;

/// Parses a raw text frame into an inbound event tagged with `platform`.
///
/// # Returns
/// * `Ok(InboundEvent)` for any JSON document
/// * `Err` if the frame is not valid JSON
pub fn parse_event(text: &str, platform: &str) -> Result<InboundEvent> {
    let payload: serde_json::Value = serde_json::from_str(text)?;
    Ok(InboundEvent::new(platform, payload))
}

/// Trait for WebSocket connections to enable testing with fake implementations
#[async_trait]
pub trait WebSocketConnection: Send {
    /// Reads the next message from the WebSocket connection
    ///
    /// # Returns
    /// * `Some(Ok(Message))` if a message was successfully received
    /// * `Some(Err(error))` if there was an error reading the message
    /// * `None` if the connection has been closed
    async fn read_message(&mut self) -> Option<Result<Message, tungstenite::Error>>;
}

#[async_trait]
impl<S> WebSocketConnection for S
where
    S: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send,
{
    async fn read_message(&mut self) -> Option<Result<Message, tungstenite::Error>> {
        self.next().await
    }
}

/// Receives OneBot events over a forward WebSocket and queues them for the
/// event workers.
pub struct OneBotEventClient {
    url: String,
    access_token: Option<String>,
    platform: String,
    output_tx: async_channel::Sender<InboundEvent>,
}

impl OneBotEventClient {
    /// Creates a new event client
    ///
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to (e.g., "ws://127.0.0.1:6700")
    /// * `access_token` - Optional bearer token for the handshake
    /// * `platform` - Tag stamped on every event
    /// * `output_tx` - Channel sender feeding the event workers
    pub fn new(
        url: String,
        access_token: Option<String>,
        platform: String,
        output_tx: async_channel::Sender<InboundEvent>,
    ) -> Self {
        Self {
            url,
            access_token,
            platform,
            output_tx,
        }
    }

    /// Processes messages from `connection` until it closes.
    ///
    /// It does not implement reconnection logic.
    pub async fn run_with_connection(&self, mut connection: Box<dyn WebSocketConnection>) -> Result<()> {
        info!("Starting OneBot event processing");

        while let Some(message) = connection.read_message().await {
            match message {
                Ok(Message::Text(text)) => match parse_event(&text, &self.platform) {
                    Ok(event) => {
                        metrics::counter!("events_received_total").increment(1);
                        trace!(payload = %event.payload, "Received event");
                        if self.output_tx.send(event).await.is_err() {
                            return Err(anyhow::anyhow!("Event channel closed"));
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse OneBot event: {}", e);
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("Received close message from server");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    trace!("Received ping/pong");
                }
                Ok(_) => {
                    debug!("Received non-text frame, ignoring");
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("WebSocket error: {}", e));
                }
            }
        }

        info!("WebSocket connection closed");
        Ok(())
    }

    /// Runs the client with automatic reconnection until shutdown is signalled.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            info!("Attempting to connect to {}", self.url);

            let result = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("OneBot event client received shutdown signal.");
                    return Ok(());
                }
                res = self.connect_and_run() => res,
            };

            match result {
                Ok(()) => {
                    info!("Connection closed normally");
                    backoff_ms = INITIAL_BACKOFF_MS;
                }
                Err(e) if self.output_tx.is_closed() => {
                    info!("Event channel closed, stopping OneBot event client: {:#}", e);
                    return Ok(());
                }
                Err(e) => {
                    error!("Connection failed: {:#}", e);
                }
            }

            info!("Reconnecting in {} ms", backoff_ms);
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("OneBot event client received shutdown signal.");
                    return Ok(());
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)) => {}
            }

            backoff_ms = std::cmp::min(backoff_ms * 2, MAX_BACKOFF_MS);
        }
    }

    async fn connect_and_run(&self) -> Result<()> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("Invalid WebSocket URL {}", self.url))?;
        if let Some(token) = &self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Access token is not a valid header value")?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        info!("Connected to {}", self.url);

        self.run_with_connection(Box::new(ws_stream)).await
    }
}
