//! Integration test utilities for the chorus client
//!
//! Provides in-process mock servers for the REST API and the WebSocket gateway so the
//! dispatcher and the shards can be exercised over real sockets.

pub mod gateway;
pub mod helpers;

pub use gateway::*;
pub use helpers::*;
