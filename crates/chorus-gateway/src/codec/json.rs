use super::Codec;
use crate::error::GatewayResult;
use crate::protocol::Envelope;
use chorus_common::Encoding;

/// Text encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encoding(&self) -> Encoding {
        Encoding::Json
    }

    fn is_text(&self) -> bool {
        true
    }

    fn encode(&self, envelope: &Envelope) -> GatewayResult<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn decode(&self, data: &[u8]) -> GatewayResult<Envelope> {
        Ok(serde_json::from_slice(data)?)
    }
}
