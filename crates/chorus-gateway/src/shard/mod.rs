//! Shard connection state machine
//!
//! Each shard runs as its own task and owns its transport, heartbeat timer and inflate
//! context. It is driven by [`ShardCommand`]s and reports back through [`ShardEvent`]s.

mod actor;
mod config;
mod limiter;

pub use actor::Shard;
pub use config::{connection_url, ShardConfig};
pub use limiter::CommandLimiter;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::Envelope;
use std::time::Duration;
use tokio::sync::mpsc;

/// Connection status of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardStatus {
    /// Created, never connected
    Idle,
    /// Opening the transport
    Connecting,
    /// Transport open, waiting for Hello
    AwaitingHello,
    Identifying,
    Resuming,
    /// Session established
    Ready,
    /// Connection closed
    Disconnected,
    /// Waiting for the connect queue to release it again
    Reconnecting,
    /// Terminal
    Destroyed,
}

impl ShardStatus {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Destroyed => "destroyed",
        }
    }

    /// States in which the server may legitimately hold heartbeat acks back
    pub const fn expects_silence(self) -> bool {
        matches!(self, Self::AwaitingHello | Self::Identifying | Self::Resuming)
    }
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Commands flowing down to a shard task
#[derive(Debug, Clone)]
pub enum ShardCommand {
    /// Open a connection; issued by the connect queue
    Connect,
    /// Send an envelope, queued until the session is established
    Send(Envelope),
    /// Close the connection and ask to be re-queued, keeping the session
    Reconnect,
    /// Close for good
    Destroy,
}

/// Events flowing up from a shard task
#[derive(Debug, Clone)]
pub enum ShardEvent {
    StatusChanged {
        shard_id: u32,
        status: ShardStatus,
    },
    /// A dispatch envelope, forwarded unchanged
    Dispatch {
        shard_id: u32,
        envelope: Envelope,
    },
    /// Heartbeat round trip measured
    Latency {
        shard_id: u32,
        latency: Duration,
    },
    /// The shard needs the connect queue to release it again
    Reconnect {
        shard_id: u32,
        resumable: bool,
    },
    /// Reconnecting cannot succeed; the shard has destroyed itself
    Fatal {
        shard_id: u32,
        code: Option<u16>,
        reason: String,
    },
    Debug {
        shard_id: u32,
        message: String,
    },
    Error {
        shard_id: u32,
        message: String,
    },
}

impl ShardEvent {
    pub fn shard_id(&self) -> u32 {
        match self {
            Self::StatusChanged { shard_id, .. }
            | Self::Dispatch { shard_id, .. }
            | Self::Latency { shard_id, .. }
            | Self::Reconnect { shard_id, .. }
            | Self::Fatal { shard_id, .. }
            | Self::Debug { shard_id, .. }
            | Self::Error { shard_id, .. } => *shard_id,
        }
    }
}

/// Cheap, cloneable handle for commanding a shard task
#[derive(Debug, Clone)]
pub struct ShardHandle {
    id: u32,
    commands: mpsc::UnboundedSender<ShardCommand>,
}

impl ShardHandle {
    pub fn new(id: u32, commands: mpsc::UnboundedSender<ShardCommand>) -> Self {
        Self { id, commands }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn connect(&self) -> GatewayResult<()> {
        self.command(ShardCommand::Connect)
    }

    pub fn send(&self, envelope: Envelope) -> GatewayResult<()> {
        self.command(ShardCommand::Send(envelope))
    }

    pub fn reconnect(&self) -> GatewayResult<()> {
        self.command(ShardCommand::Reconnect)
    }

    pub fn destroy(&self) -> GatewayResult<()> {
        self.command(ShardCommand::Destroy)
    }

    /// Whether the shard task has exited
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn command(&self, command: ShardCommand) -> GatewayResult<()> {
        self.commands
            .send(command)
            .map_err(|_| GatewayError::Closed)
    }
}
