use super::{Connector, Transport, WireFrame};
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use chorus_common::GatewayConfig;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Connects over WebSocket (`ws://` or `wss://`)
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
    /// Covers TCP connect, TLS and the upgrade handshake
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(Duration::from_millis(config.connect_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn Transport>> {
        let (stream, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    GatewayError::Transport(format!(
                        "Handshake timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ))
                })??;
        tracing::debug!(url = %url, status = %response.status(), "WebSocket connected");
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: WireFrame) -> GatewayResult<()> {
        let message = match frame {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(bytes) => Message::Binary(bytes),
            WireFrame::Close(code) => return self.close(code.unwrap_or(1000), "").await,
        };
        self.stream.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<GatewayResult<WireFrame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(Ok(WireFrame::Text(text))),
                Message::Binary(bytes) => return Some(Ok(WireFrame::Binary(bytes))),
                Message::Close(frame) => {
                    let code = frame.map(|f| u16::from(f.code));
                    return Some(Ok(WireFrame::Close(code)));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    tracing::trace!("Control frame received");
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> GatewayResult<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}
