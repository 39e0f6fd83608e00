use crate::protocol::{IdentifyPayload, IdentifyProperties};
use chorus_common::{Compression, Encoding, GatewayConfig};
use chorus_core::Intents;
use serde_json::Value;
use std::time::Duration;

/// Per-shard settings
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub id: u32,
    pub total: u32,
    pub token: String,
    /// Gateway host without query string
    pub gateway_url: String,
    pub version: u8,
    pub encoding: Encoding,
    pub compression: Compression,
    pub intents: Intents,
    pub large_threshold: u16,
    pub properties: IdentifyProperties,
    /// Presence sent with identify
    pub presence: Option<Value>,
    /// Randomize the first heartbeat within the interval
    pub heartbeat_jitter: bool,
    /// Reconnect if no Hello arrives this long after the transport opens
    pub hello_timeout: Duration,
    /// Consecutive failed connects before the shard gives up
    pub max_connect_attempts: u32,
}

impl ShardConfig {
    pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(20);
    pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 5;

    pub fn new(
        id: u32,
        total: u32,
        token: impl Into<String>,
        gateway_url: impl Into<String>,
        gateway: &GatewayConfig,
    ) -> Self {
        Self {
            id,
            total,
            token: token.into(),
            gateway_url: gateway_url.into(),
            version: gateway.version,
            encoding: gateway.encoding,
            compression: gateway.compression,
            intents: gateway.intents,
            large_threshold: gateway.large_threshold,
            properties: IdentifyProperties::default(),
            presence: None,
            heartbeat_jitter: true,
            hello_timeout: Self::DEFAULT_HELLO_TIMEOUT,
            max_connect_attempts: Self::DEFAULT_MAX_CONNECT_ATTEMPTS,
        }
    }

    /// Identify payload for this shard
    pub fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.token.clone(),
            properties: self.properties.clone(),
            shard: [self.id, self.total],
            intents: self.intents,
            compress: self.compression == Compression::Payload,
            large_threshold: self.large_threshold,
            v: Some(self.version),
            presence: self.presence.clone(),
        }
    }
}

/// Gateway URL with the protocol query string
pub fn connection_url(base: &str, version: u8, encoding: Encoding, compression: Compression) -> String {
    let base = base.split('?').next().unwrap_or(base).trim_end_matches('/');
    let mut url = format!("{base}/?v={version}&encoding={}", encoding.as_str());
    if compression == Compression::ZlibStream {
        url.push_str("&compress=zlib-stream");
    }
    url
}
