//! In-memory transport
//!
//! Every `connect` hands the far end of a fresh pipe to whoever holds the
//! [`MemoryServer`] receiver, which can then play the gateway.

use super::{Connector, Transport, WireFrame};
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Connector backed by channels
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryServer>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of server-side endpoints
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryServer>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (Self { accepted }, rx)
    }
}

/// Server side of one in-memory connection
#[derive(Debug)]
pub struct MemoryServer {
    /// URL the client connected to
    pub url: String,
    to_client: mpsc::UnboundedSender<WireFrame>,
    from_client: mpsc::UnboundedReceiver<WireFrame>,
}

impl MemoryServer {
    /// Send a frame to the client; returns `false` if the client is gone
    pub fn send(&self, frame: WireFrame) -> bool {
        self.to_client.send(frame).is_ok()
    }

    /// Next frame from the client; `None` once the client dropped its end
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.from_client.recv().await
    }

    /// Frame already sent by the client, without waiting
    pub fn try_recv(&mut self) -> Option<WireFrame> {
        self.from_client.try_recv().ok()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn Transport>> {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();

        self.accepted
            .send(MemoryServer {
                url: url.to_string(),
                to_client,
                from_client,
            })
            .map_err(|_| GatewayError::Transport("connection refused".to_string()))?;

        Ok(Box::new(MemoryTransport { incoming, outgoing }))
    }
}

struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<WireFrame>,
    outgoing: mpsc::UnboundedSender<WireFrame>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: WireFrame) -> GatewayResult<()> {
        self.outgoing.send(frame).map_err(|_| GatewayError::Closed)
    }

    async fn recv(&mut self) -> Option<GatewayResult<WireFrame>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, _reason: &str) -> GatewayResult<()> {
        // The peer may already be gone
        let _ = self.outgoing.send(WireFrame::Close(Some(code)));
        self.incoming.close();
        Ok(())
    }
}
