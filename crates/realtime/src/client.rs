//! Transport seam and the WebSocket client behind it.
//!
//! The connection manager only talks to [`Connector`] and [`Transport`];
//! [`WsConnector`] is the production implementation over
//! `tokio-tungstenite`. Tests plug in scripted in-memory transports.

use std::fmt;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::{ConfigError, SyncConfig};

/// Lifecycle of the streaming connection as seen by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

/// Opens transports. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, ClientError>;
}

/// One open duplex connection carrying text frames.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ClientError>;

    /// Next inbound text frame. `None` once the peer has closed.
    ///
    /// Must be cancel-safe: it is polled inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<String, ClientError>>;

    /// Close from our side. Errors are swallowed; the transport is gone
    /// either way.
    async fn close(&mut self);
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// Connects to the processing-status WebSocket endpoint.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// * `url` - full endpoint URL, e.g. `ws://host:8000/api/v1/ws/processing`.
    pub fn new(url: String) -> Self {
        Self { url }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.ws_url()?))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ClientError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Connection(format!("Failed to connect to {}: {e}", self.url)))?;

        let session_id = uuid::Uuid::new_v4();
        tracing::info!(url = %self.url, session_id = %session_id, "WebSocket connected");

        Ok(Box::new(WsTransport { stream, session_id }))
    }
}

/// A live WebSocket connection.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    /// Correlates log lines of one connection.
    session_id: uuid::Uuid,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ClientError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(_)) => {
                    tracing::trace!(session_id = %self.session_id, "Ignoring binary frame");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(session_id = %self.session_id, ?frame, "WebSocket closed by peer");
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(ClientError::Protocol(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(session_id = %self.session_id, error = %e, "WebSocket close failed");
        }
    }
}

/// Errors from the transport layer. Never surfaced as job failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Nothing was received for too long; the peer is presumed dead.
    #[error("No frames received for {0:?}")]
    Timeout(std::time::Duration),
}
