//! Envelope codecs
//!
//! Both encodings share one interface; the shard picks one at construction through
//! [`codec_for`] and never inspects which it got.

mod etf;
mod json;

pub use etf::EtfCodec;
pub use json::JsonCodec;

use crate::error::GatewayResult;
use crate::protocol::Envelope;
use bytes::Bytes;
use chorus_common::Encoding;

/// Envelope serializer
pub trait Codec: Send + Sync {
    /// Query-string name of this encoding
    fn encoding(&self) -> Encoding;

    /// Whether encoded envelopes travel as text frames
    fn is_text(&self) -> bool;

    fn encode(&self, envelope: &Envelope) -> GatewayResult<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> GatewayResult<Envelope>;

    /// Decode an envelope that arrived split across several buffers
    fn decode_fragments(&self, fragments: &[Bytes]) -> GatewayResult<Envelope> {
        match fragments {
            [single] => self.decode(single),
            _ => self.decode(&fragments.concat()),
        }
    }
}

/// Codec for a configured encoding
pub fn codec_for(encoding: Encoding) -> Box<dyn Codec> {
    match encoding {
        Encoding::Json => Box::new(JsonCodec),
        Encoding::Etf => Box::new(EtfCodec),
    }
}
