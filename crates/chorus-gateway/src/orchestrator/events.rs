use crate::protocol::Envelope;
use crate::shard::ShardStatus;
use serde::Serialize;
use std::time::Duration;

/// Events surfaced to the application
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Dispatch envelope tagged with the shard it arrived on
    Dispatch { shard_id: u32, envelope: Envelope },
    /// One shard established its session
    ShardReady { shard_id: u32 },
    /// Every shard has been ready at least once; emitted once
    Ready { shard_count: u32 },
    /// A shard went back into the connect queue
    Reconnecting { shard_id: u32, resumable: bool },
    Debug { shard_id: Option<u32>, message: String },
    Error { shard_id: Option<u32>, message: String },
    /// A shard hit an unrecoverable close; every shard is shut down after this
    Fatal {
        shard_id: u32,
        code: Option<u16>,
        reason: String,
    },
    /// All shard tasks have ended
    Shutdown,
}

impl OrchestratorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dispatch { .. } => "dispatch",
            Self::ShardReady { .. } => "shard_ready",
            Self::Ready { .. } => "ready",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Debug { .. } => "debug",
            Self::Error { .. } => "error",
            Self::Fatal { .. } => "fatal",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Read-only mirror of one shard, kept up to date from its events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardDescriptor {
    pub id: u32,
    pub total_shards: u32,
    #[serde(serialize_with = "serialize_status")]
    pub status: ShardStatus,
    /// Last measured heartbeat round trip
    pub latency_ms: Option<u64>,
}

impl ShardDescriptor {
    pub fn new(id: u32, total_shards: u32) -> Self {
        Self {
            id,
            total_shards,
            status: ShardStatus::Idle,
            latency_ms: None,
        }
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency_ms.map(Duration::from_millis)
    }
}

fn serialize_status<S: serde::Serializer>(status: &ShardStatus, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(status.name())
}
