//! Inbound decompression
//!
//! In `zlib-stream` mode the whole connection shares one inflate context and a message may
//! span several binary frames. A message is complete only when a frame ends with the
//! `Z_SYNC_FLUSH` marker; until then frames are buffered rather than fed to the inflater.

use crate::error::{GatewayError, GatewayResult};
use chorus_common::Compression;
use flate2::{Decompress, FlushDecompress, Status};
use std::io::Read;

/// Trailer of every complete message in a zlib stream
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Inbound binary frame decoder
pub trait Decompressor: Send {
    /// Feed one raw frame; returns a decoded message once one is complete
    fn push(&mut self, chunk: &[u8]) -> GatewayResult<Option<Vec<u8>>>;
}

/// Decompressor for a configured compression mode
pub fn decompressor_for(compression: Compression) -> Box<dyn Decompressor> {
    match compression {
        Compression::None => Box::new(Passthrough),
        Compression::Payload => Box::new(PayloadInflater),
        Compression::ZlibStream => Box::new(ZlibStream::new()),
    }
}

/// Append `chunk` to `pending` and hand back the buffered message once it is complete
pub fn take_complete_message(pending: &mut Vec<u8>, chunk: &[u8]) -> Option<Vec<u8>> {
    pending.extend_from_slice(chunk);
    if pending.ends_with(&ZLIB_SUFFIX) {
        Some(std::mem::take(pending))
    } else {
        None
    }
}

/// Frames are already plain
#[derive(Debug, Default)]
pub struct Passthrough;

impl Decompressor for Passthrough {
    fn push(&mut self, chunk: &[u8]) -> GatewayResult<Option<Vec<u8>>> {
        Ok(Some(chunk.to_vec()))
    }
}

/// Each binary frame is an independent zlib stream
#[derive(Debug, Default)]
pub struct PayloadInflater;

impl Decompressor for PayloadInflater {
    fn push(&mut self, chunk: &[u8]) -> GatewayResult<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(chunk.len() * 4);
        flate2::read::ZlibDecoder::new(chunk)
            .read_to_end(&mut out)
            .map_err(|e| GatewayError::Compression(e.to_string()))?;
        Ok(Some(out))
    }
}

/// One inflate context for the lifetime of the connection
pub struct ZlibStream {
    inflater: Decompress,
    pending: Vec<u8>,
}

impl ZlibStream {
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            pending: Vec::new(),
        }
    }

    /// Bytes buffered while waiting for the end-of-message marker
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn inflate(&mut self, input: &[u8]) -> GatewayResult<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() * 4);
        let mut consumed = 0;

        loop {
            if out.len() == out.capacity() {
                out.reserve(input.len().max(1024));
            }

            let (in_before, out_before) = (self.inflater.total_in(), self.inflater.total_out());
            let status = self
                .inflater
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| GatewayError::Compression(e.to_string()))?;
            consumed += (self.inflater.total_in() - in_before) as usize;
            let progressed =
                self.inflater.total_in() != in_before || self.inflater.total_out() != out_before;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    // Done once all input is in and the inflater left output space unused
                    if consumed >= input.len() && out.len() < out.capacity() {
                        break;
                    }
                    if !progressed && out.len() < out.capacity() {
                        return Err(GatewayError::Compression(
                            "inflate made no progress".to_string(),
                        ));
                    }
                }
            }
        }

        Ok(out)
    }
}

impl Default for ZlibStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor for ZlibStream {
    fn push(&mut self, chunk: &[u8]) -> GatewayResult<Option<Vec<u8>>> {
        let Some(message) = take_complete_message(&mut self.pending, chunk) else {
            tracing::trace!(buffered = self.pending.len(), "Buffered partial zlib frame");
            return Ok(None);
        };
        self.inflate(&message).map(Some)
    }
}

impl std::fmt::Debug for ZlibStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibStream")
            .field("pending", &self.pending.len())
            .finish()
    }
}
