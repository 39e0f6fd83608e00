//! # chorus-gateway
//!
//! Sharded gateway client: wire codecs, transport compression, the per-shard connection
//! state machine, identify pacing and the orchestrator that ties shards together.

pub mod codec;
pub mod compression;
pub mod error;
pub mod heartbeat;
pub mod orchestrator;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod shard;
pub mod transport;

pub use error::{GatewayError, GatewayResult};
pub use orchestrator::{OrchestratorEvent, ShardDescriptor, ShardOrchestrator};
pub use protocol::{Envelope, OpCode};
pub use shard::{Shard, ShardConfig, ShardHandle, ShardStatus};
pub use transport::{Connector, Transport, WebSocketConnector, WireFrame};
