//! Connection transports
//!
//! A shard talks to the gateway through [`Transport`] and opens connections through a
//! [`Connector`], so the state machine can run over a real WebSocket or an in-memory pipe.

pub mod memory;
mod websocket;

pub use websocket::WebSocketConnector;

use crate::error::GatewayResult;
use async_trait::async_trait;
use std::sync::Arc;

/// One frame on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Close frame; `None` when the peer sent no status code
    Close(Option<u16>),
}

/// An open connection
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: WireFrame) -> GatewayResult<()>;

    /// Next data or close frame; `None` once the stream has ended
    async fn recv(&mut self) -> Option<GatewayResult<WireFrame>>;

    /// Send a close frame and shut the connection down
    async fn close(&mut self, code: u16, reason: &str) -> GatewayResult<()>;
}

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn Transport>>;
}

/// Shared connector handle
pub type SharedConnector = Arc<dyn Connector>;
