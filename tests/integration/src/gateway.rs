//! Mock WebSocket gateway
//!
//! Speaks the JSON encoding without compression. Every connection gets a Hello, identifies
//! are answered with READY and resumes with RESUMED. Everything the client sends is
//! forwarded to the test through a channel.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chorus_gateway::{Envelope, OpCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How the mock behaves
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub heartbeat_interval: u64,
    /// Close the first connection with this code right after its READY and one dispatch
    pub close_first_connection: Option<u16>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: 45_000,
            close_first_connection: None,
        }
    }
}

/// A command the client sent, with the connection it arrived on
#[derive(Debug, Clone)]
pub struct ReceivedCommand {
    /// Zero-based connection counter
    pub connection: usize,
    pub query: Option<String>,
    pub envelope: Envelope,
}

struct GatewayState {
    url: String,
    options: GatewayOptions,
    connections: AtomicUsize,
    received: mpsc::UnboundedSender<ReceivedCommand>,
}

/// Mock gateway served on an ephemeral local port
pub struct MockGateway {
    pub addr: SocketAddr,
    state: Arc<GatewayState>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start(options: GatewayOptions) -> Result<(Self, mpsc::UnboundedReceiver<ReceivedCommand>)> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let (received, commands) = mpsc::unbounded_channel();
        let state = Arc::new(GatewayState {
            url: format!("ws://{addr}"),
            options,
            connections: AtomicUsize::new(0),
            received,
        });

        let app = Router::new()
            .route("/", get(upgrade))
            .with_state(Arc::clone(&state));
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok((
            Self {
                addr,
                state,
                _handle: handle,
            },
            commands,
        ))
    }

    /// URL to hand to shards, without query string
    pub fn url(&self) -> String {
        self.state.url.clone()
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    RawQuery(query): RawQuery,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    ws.on_upgrade(move |socket| serve(socket, state, query))
}

async fn send(socket: &mut WebSocket, envelope: &Envelope) -> bool {
    match serde_json::to_string(envelope) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(_) => false,
    }
}

async fn serve(mut socket: WebSocket, state: Arc<GatewayState>, query: Option<String>) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    let mut seq = 0_u64;

    if !send(&mut socket, &Envelope::hello(state.options.heartbeat_interval)).await {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
            continue;
        };
        let op = envelope.op;
        let _ = state.received.send(ReceivedCommand {
            connection,
            query: query.clone(),
            envelope: envelope.clone(),
        });

        match op {
            OpCode::Heartbeat => {
                send(&mut socket, &Envelope::heartbeat_ack()).await;
            }
            OpCode::Identify => {
                let shard = envelope.d["shard"].clone();
                seq += 1;
                let ready = Envelope::dispatch(
                    "READY",
                    seq,
                    json!({
                        "session_id": format!("session-{connection}"),
                        "resume_gateway_url": state.url,
                        "shard": shard,
                    }),
                );
                send(&mut socket, &ready).await;

                if connection == 0 {
                    if let Some(code) = state.options.close_first_connection {
                        seq += 1;
                        send(
                            &mut socket,
                            &Envelope::dispatch("MESSAGE_CREATE", seq, json!({"id": "1"})),
                        )
                        .await;
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: Cow::from("closing"),
                            })))
                            .await;
                        break;
                    }
                }
            }
            OpCode::Resume => {
                seq = envelope.d["seq"].as_u64().unwrap_or(0) + 1;
                send(&mut socket, &Envelope::dispatch("RESUMED", seq, json!({}))).await;
            }
            _ => {}
        }
    }
}
